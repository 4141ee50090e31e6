//! Ordered-by-due-time store for scheduling future delivery of payloads.
//!
//! A [`DelayQueue`] is a thin layer over a [`SortedSetStore`]: each named
//! queue is one sorted set where the score is the epoch second at which the
//! member becomes due. Draining pages through due members in ascending score
//! order, then removes the whole scanned range with one bulk delete.
//!
//! # Delivery guarantee
//!
//! The bulk delete only happens after the last page has been handled, so a
//! crash between handling and deletion redelivers the same members on the
//! next sweep. Consumers get at-least-once delivery and must tolerate
//! duplicates; the queue makes no attempt to deduplicate across sweeps.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::store::{ScoredMember, SortedSetStore, StoreError};
use crate::time::Clock;

/// Members fetched per page while draining.
pub const PAGE_SIZE: usize = 2000;

/// Errors from delay-queue sweeps.
#[derive(Debug, Error)]
pub enum DelayQueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A set of named delayed-payload queues sharing one sorted-set store.
pub struct DelayQueue {
    store: Arc<dyn SortedSetStore>,
    prefix: String,
    clock: Arc<Clock>,
}

impl DelayQueue {
    pub fn new(store: Arc<dyn SortedSetStore>, prefix: impl Into<String>, clock: Arc<Clock>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            clock,
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    /// Enqueues `member` to become due `after` seconds from now.
    ///
    /// Failures are logged rather than propagated; a lost enqueue degrades
    /// to "not delivered", which producers already tolerate.
    pub async fn add(&self, name: &str, member: &str, after: i64) {
        let due = self.clock.now_unix() + after;
        if let Err(err) = self.store.add(&self.key(name), member, due).await {
            error!(name, member, after, %err, "Failed to enqueue delayed member");
        }
    }

    /// Estimated queue length (due and not-yet-due members).
    pub async fn len(&self, name: &str) -> i64 {
        self.store.card(&self.key(name)).await.unwrap_or(0)
    }

    /// Drains every member with score <= `max_score`, invoking `handler`
    /// once per member in ascending score order within each page.
    ///
    /// After all pages are exhausted one bulk delete removes the scanned
    /// range. If a page read fails mid-drain the sweep aborts *without*
    /// deleting, so no member is silently lost; the next sweep redelivers
    /// everything already handled (at-least-once).
    ///
    /// Returns the number of members handled.
    pub async fn drain<F>(
        &self,
        name: &str,
        max_score: i64,
        mut handler: F,
    ) -> Result<u64, DelayQueueError>
    where
        F: FnMut(ScoredMember),
    {
        let key = self.key(name);
        let mut offset = 0usize;
        loop {
            let page = self
                .store
                .range_by_score(&key, max_score, offset, PAGE_SIZE)
                .await?;
            let page_len = page.len();
            for item in page {
                handler(item);
            }
            offset += page_len;
            if page_len < PAGE_SIZE {
                break;
            }
        }

        if offset > 0 {
            let removed = self.store.remove_by_score(&key, max_score).await?;
            info!(name, removed, "Cleared drained batch");
        }
        Ok(offset as u64)
    }
}
