//! Rate-limited message delivery bus.
//!
//! Two delivery variants share one wire model and one send gate:
//!
//! - [`BusExecutor`] - an in-process busy executor that drains its named
//!   delay queue and fans delivery out to a bounded worker pool.
//! - [`LaneBus`] / [`LaneConsumer`] - three priority lanes
//!   (critical/default/low) over the same delay-queue store, so bulk
//!   low-urgency sends cannot block time-critical ones.
//!
//! Every delivery attempt is audited through the [`MessageDao`], sent or
//! not. Transient send failures are recorded on the message and never
//! retried by the bus; a new emission is required.

mod dao;
mod drain;
mod lanes;
mod message;

pub use dao::{DaoError, MemoryMessageDao, MessageDao, MessageRecord};
pub use drain::{BusExecutor, DEFAULT_WORKERS};
pub use lanes::{Lane, LaneBus, LaneConsumer, DEFAULT_CONCURRENCY, DEFAULT_POLL_INTERVAL};
pub use message::{Message, PeriodLimit, DEFAULT_PHASE_SECS};

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::time::Clock;

/// Failure delivering one message to its transport.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SendError(String);

impl SendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Domain-specific transport the bus dispatches to.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, m: &Message) -> Result<(), SendError>;
}

/// True if the message's quota is exhausted.
///
/// A message without required identity (user id or group) is always
/// limited. DAO count failures fail open with a warning, matching the
/// backing implementations which treat an unreachable count as zero.
pub async fn is_limited(m: &Message, dao: &dyn MessageDao, clock: &Clock) -> bool {
    if m.period_limit.limit <= 0 {
        return false;
    }
    let group_id = m.group_id();
    if m.user_id == 0 || group_id.is_empty() {
        return true;
    }
    // A limit with no window length is a producer bug; refusing the send
    // keeps the window arithmetic away from a zero divisor.
    if !m.period_limit.is_lifetime() && m.period_limit.period <= 0 {
        warn!(
            user_id = m.user_id,
            group_id = %group_id,
            period = m.period_limit.period,
            "Rate limit has no window length, refusing send"
        );
        return true;
    }

    let count = if m.period_limit.is_lifetime() {
        dao.count_all(m.user_id, &group_id).await
    } else {
        let (start, end) = m.period_limit.window(clock.now_unix());
        dao.count_in_period(start, end, m.user_id, &group_id).await
    };

    match count {
        Ok(count) => count >= m.period_limit.limit,
        Err(err) => {
            warn!(
                user_id = m.user_id,
                group_id = %group_id,
                %err,
                "Rate limit count failed, allowing send"
            );
            false
        }
    }
}

/// The send gate shared by both variants: whitelist restriction first,
/// then the period limit.
pub(crate) async fn can_send(
    m: &Message,
    whitelist: &[i64],
    dao: &dyn MessageDao,
    clock: &Clock,
) -> bool {
    if m.whitelist_only && !whitelist.contains(&m.user_id) {
        return false;
    }
    !is_limited(m, dao, clock).await
}
