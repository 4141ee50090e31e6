//! Message audit DAO contract and in-memory implementation.
//!
//! The backing store is interchangeable (relational or search-index in
//! production); the bus only needs to persist attempts and count sent
//! deliveries per user and group.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use super::Message;
use crate::time::Clock;

/// Errors from the message audit store.
#[derive(Debug, Error)]
pub enum DaoError {
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

/// Persists delivery attempts and answers quota counts.
///
/// Counts only consider attempts that were actually sent.
#[async_trait]
pub trait MessageDao: Send + Sync {
    /// Records one delivery attempt, sent or not; returns a record id.
    async fn put(&self, m: &Message) -> Result<i64, DaoError>;

    /// Sent deliveries for `user_id` + `group_id` with creation time in
    /// `[start, end)`.
    async fn count_in_period(
        &self,
        start: i64,
        end: i64,
        user_id: i64,
        group_id: &str,
    ) -> Result<i64, DaoError>;

    /// Sent deliveries for `user_id` + `group_id` over all time.
    async fn count_all(&self, user_id: i64, group_id: &str) -> Result<i64, DaoError>;
}

/// One persisted audit row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub user_id: i64,
    pub group_id: String,
    pub sent: bool,
    pub gmt_create: i64,
}

/// In-memory [`MessageDao`] used by tests and single-process deployments.
pub struct MemoryMessageDao {
    clock: Arc<Clock>,
    rows: RwLock<Vec<MessageRecord>>,
}

impl MemoryMessageDao {
    pub fn new(clock: Arc<Clock>) -> Self {
        Self {
            clock,
            rows: RwLock::new(Vec::new()),
        }
    }

    /// Copy of every persisted row, in insertion order.
    pub fn records(&self) -> Vec<MessageRecord> {
        self.rows.read().clone()
    }
}

#[async_trait]
impl MessageDao for MemoryMessageDao {
    async fn put(&self, m: &Message) -> Result<i64, DaoError> {
        let mut rows = self.rows.write();
        rows.push(MessageRecord {
            user_id: m.user_id,
            group_id: m.group_id(),
            sent: m.sent,
            gmt_create: self.clock.now_unix(),
        });
        Ok(rows.len() as i64)
    }

    async fn count_in_period(
        &self,
        start: i64,
        end: i64,
        user_id: i64,
        group_id: &str,
    ) -> Result<i64, DaoError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|r| {
                r.sent
                    && r.user_id == user_id
                    && r.group_id == group_id
                    && r.gmt_create >= start
                    && r.gmt_create < end
            })
            .count() as i64)
    }

    async fn count_all(&self, user_id: i64, group_id: &str) -> Result<i64, DaoError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|r| r.sent && r.user_id == user_id && r.group_id == group_id)
            .count() as i64)
    }
}
