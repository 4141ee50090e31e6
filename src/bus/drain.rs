//! In-process bus variant: a busy executor draining its named delay queue.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use super::{can_send, Message, MessageDao, MessageSender};
use crate::delay_queue::DelayQueue;
use crate::runtime::{ExecContext, ExecError, Executor};
use crate::time::Clock;

/// Default size of the delivery worker pool.
pub const DEFAULT_WORKERS: usize = 10;

/// A busy [`Executor`] that drains one named message queue.
///
/// Each sweep collects every due message, fans delivery out to a bounded
/// worker pool, applies the send gate per message, and persists the
/// outcome through the DAO whether or not the send happened. Consumers
/// must tolerate redelivery: the underlying drain is at-least-once.
pub struct BusExecutor {
    bus_name: String,
    workers: usize,
    whitelist: Vec<i64>,
    queue: Arc<DelayQueue>,
    dao: Arc<dyn MessageDao>,
    sender: Arc<dyn MessageSender>,
    clock: Arc<Clock>,
}

impl BusExecutor {
    pub fn new(
        bus_name: impl Into<String>,
        queue: Arc<DelayQueue>,
        dao: Arc<dyn MessageDao>,
        sender: Arc<dyn MessageSender>,
        clock: Arc<Clock>,
    ) -> Self {
        Self {
            bus_name: bus_name.into(),
            workers: DEFAULT_WORKERS,
            whitelist: Vec::new(),
            queue,
            dao,
            sender,
            clock,
        }
    }

    /// Sets the worker pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the user ids allowed through whitelist-only messages.
    pub fn with_whitelist(mut self, whitelist: Vec<i64>) -> Self {
        self.whitelist = whitelist;
        self
    }

    /// Schedules a message onto this bus, due `after` seconds from now.
    pub async fn publish(&self, user_id: i64, mut m: Message, after: i64) {
        m.user_id = user_id;
        match serde_json::to_string(&m) {
            Ok(payload) => self.queue.add(&self.bus_name, &payload, after).await,
            Err(err) => error!(bus = %self.bus_name, %err, "Failed to encode message"),
        }
    }

    async fn deliver(&self, mut m: Message) {
        if m.user_id == 0 {
            warn!(bus = %self.bus_name, group_id = %m.group_id(), "Message without user id skipped");
            return;
        }

        if can_send(&m, &self.whitelist, self.dao.as_ref(), &self.clock).await {
            match self.sender.send(&m).await {
                Ok(()) => m.sent = true,
                Err(err) => {
                    error!(
                        bus = %self.bus_name,
                        user_id = m.user_id,
                        group_id = %m.group_id(),
                        %err,
                        "Send failed"
                    );
                    m.sent_err = err.to_string();
                }
            }
        }

        // Every attempt is audited, sent or not.
        match self.dao.put(&m).await {
            Ok(id) => info!(bus = %self.bus_name, id, sent = m.sent, "Message recorded"),
            Err(err) => error!(bus = %self.bus_name, user_id = m.user_id, %err, "Audit write failed"),
        }
    }
}

#[async_trait]
impl Executor for BusExecutor {
    fn name(&self) -> &str {
        &self.bus_name
    }

    fn description(&self) -> &str {
        "message delivery queue"
    }

    fn next_duration(&self) -> i64 {
        0
    }

    async fn progress(&self) -> String {
        format!("{} messages pending", self.queue.len(&self.bus_name).await)
    }

    async fn process(&self, _ctx: &ExecContext) -> Result<(), ExecError> {
        let cutoff = self.clock.now_unix();
        let mut batch = Vec::new();
        self.queue
            .drain(&self.bus_name, cutoff, |item| {
                match serde_json::from_str::<Message>(&item.member) {
                    Ok(m) => batch.push(m),
                    // Terminal: a payload that cannot be decoded is never retried.
                    Err(err) => {
                        error!(bus = %self.bus_name, raw = %item.member, %err, "Unparseable payload dropped");
                    }
                }
            })
            .await?;

        stream::iter(batch)
            .for_each_concurrent(self.workers, |m| self.deliver(m))
            .await;
        Ok(())
    }
}
