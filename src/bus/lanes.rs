//! Priority-lane bus variant.
//!
//! Three lanes over the delay-queue store keep bulk sends out of the way
//! of time-critical ones: `emit` goes to the critical lane immediately,
//! `emit_at` schedules into the critical lane, `emit_low` schedules into
//! the low lane. A [`LaneConsumer`] drains due entries lane by lane in
//! priority order.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{can_send, Message, MessageDao, MessageSender};
use crate::delay_queue::DelayQueue;
use crate::time::Clock;

/// Default lane poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default per-lane delivery concurrency.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Delivery priority lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Critical,
    Default,
    Low,
}

impl Lane {
    /// Lanes in drain order, highest priority first.
    pub const ORDERED: [Lane; 3] = [Lane::Critical, Lane::Default, Lane::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Critical => "critical",
            Lane::Default => "default",
            Lane::Low => "low",
        }
    }
}

/// Producer half of the lane bus. Cheap to clone.
#[derive(Clone)]
pub struct LaneBus {
    name: String,
    queue: Arc<DelayQueue>,
}

impl LaneBus {
    pub fn new(name: impl Into<String>, queue: Arc<DelayQueue>) -> Self {
        Self {
            name: name.into(),
            queue,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lane_queue(&self, lane: Lane) -> String {
        format!("{}:{}", self.name, lane.as_str())
    }

    /// Emits immediately on the critical lane.
    pub async fn emit(&self, user_id: i64, m: Message) {
        self.enqueue(Lane::Critical, user_id, m, 0).await;
    }

    /// Schedules on the critical lane, due `after` seconds from now.
    /// Still high priority despite the future due time.
    pub async fn emit_at(&self, user_id: i64, m: Message, after: i64) {
        self.enqueue(Lane::Critical, user_id, m, after).await;
    }

    /// Schedules bulk/low-urgency delivery on the low lane.
    pub async fn emit_low(&self, user_id: i64, m: Message, after: i64) {
        self.enqueue(Lane::Low, user_id, m, after).await;
    }

    /// Schedules on an explicit lane.
    pub async fn emit_in(&self, lane: Lane, user_id: i64, m: Message, after: i64) {
        self.enqueue(lane, user_id, m, after).await;
    }

    /// Number of queued entries across all lanes.
    pub async fn backlog(&self) -> i64 {
        let mut total = 0;
        for lane in Lane::ORDERED {
            total += self.queue.len(&self.lane_queue(lane)).await;
        }
        total
    }

    async fn enqueue(&self, lane: Lane, user_id: i64, mut m: Message, after: i64) {
        // Producers always stamp the user id so it cannot be forgotten.
        m.user_id = user_id;
        match serde_json::to_string(&m) {
            Ok(payload) => self.queue.add(&self.lane_queue(lane), &payload, after).await,
            Err(err) => {
                error!(bus = %self.name, lane = lane.as_str(), %err, "Failed to encode message");
            }
        }
    }
}

/// Long-running consumer over the three priority lanes.
///
/// Runs until the cancellation token fires. Each cycle drains due entries
/// from every lane in priority order with bounded concurrency; unparseable
/// payloads are a terminal failure, everything else goes through the
/// gate/send/persist sequence inline.
pub struct LaneConsumer {
    bus: LaneBus,
    whitelist: Vec<i64>,
    dao: Arc<dyn MessageDao>,
    sender: Arc<dyn MessageSender>,
    clock: Arc<Clock>,
    concurrency: usize,
    poll_interval: Duration,
}

impl LaneConsumer {
    pub fn new(
        bus: LaneBus,
        dao: Arc<dyn MessageDao>,
        sender: Arc<dyn MessageSender>,
        clock: Arc<Clock>,
    ) -> Self {
        Self {
            bus,
            whitelist: Vec::new(),
            dao,
            sender,
            clock,
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_whitelist(mut self, whitelist: Vec<i64>) -> Self {
        self.whitelist = whitelist;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Runs the consumer until shutdown is signalled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            bus = %self.bus.name,
            poll_ms = self.poll_interval.as_millis() as u64,
            concurrency = self.concurrency,
            "Lane consumer starting"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(bus = %self.bus.name, "Lane consumer shutting down");
                    break;
                }

                _ = tokio::time::sleep(self.poll_interval) => {
                    self.drain_due().await;
                }
            }
        }
    }

    async fn drain_due(&self) {
        let cutoff = self.clock.now_unix();
        for lane in Lane::ORDERED {
            let queue_name = self.bus.lane_queue(lane);
            let mut batch = Vec::new();
            let drained = self
                .bus
                .queue
                .drain(&queue_name, cutoff, |item| {
                    match serde_json::from_str::<Message>(&item.member) {
                        Ok(m) => batch.push(m),
                        // Terminal: never retried.
                        Err(err) => {
                            error!(
                                bus = %self.bus.name,
                                lane = lane.as_str(),
                                raw = %item.member,
                                %err,
                                "Unparseable payload dropped"
                            );
                        }
                    }
                })
                .await;
            if let Err(err) = drained {
                error!(bus = %self.bus.name, lane = lane.as_str(), %err, "Lane drain failed");
                continue;
            }

            futures::stream::iter(batch)
                .for_each_concurrent(self.concurrency, |m| self.handle(lane, m))
                .await;
        }
    }

    async fn handle(&self, lane: Lane, mut m: Message) {
        if m.user_id == 0 {
            warn!(bus = %self.bus.name, group_id = %m.group_id(), "Message without user id");
            m.sent_err = "user id missing".to_string();
        } else if can_send(&m, &self.whitelist, self.dao.as_ref(), &self.clock).await {
            match self.sender.send(&m).await {
                Ok(()) => m.sent = true,
                Err(err) => {
                    error!(
                        bus = %self.bus.name,
                        lane = lane.as_str(),
                        user_id = m.user_id,
                        group_id = %m.group_id(),
                        %err,
                        "Send failed"
                    );
                    m.sent_err = err.to_string();
                }
            }
        }

        match self.dao.put(&m).await {
            Ok(id) => info!(bus = %self.bus.name, lane = lane.as_str(), id, sent = m.sent, "Message recorded"),
            Err(err) => error!(bus = %self.bus.name, user_id = m.user_id, %err, "Audit write failed"),
        }
    }
}
