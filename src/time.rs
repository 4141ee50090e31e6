//! Canonical time source for the runtime.
//!
//! Every component reads "now" through a [`Clock`] so that the replay path
//! can pin the whole runtime to a historical day. Day-boundary helpers use
//! a fixed UTC+8 day phase, matching the deployment timezone of the data
//! the runtime schedules against.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds in one day.
pub const DAY_SECS: i64 = 86_400;

/// Day boundaries are computed in UTC+8.
pub const DAY_PHASE_SECS: i64 = 8 * 3600;

/// Sentinel meaning "not pinned, use the wall clock".
const LIVE: i64 = i64::MIN;

/// A wall clock that can be pinned to a fixed epoch second.
///
/// Pinning is used by the replay path to re-run an executor with "now"
/// fixed to each simulated day. Constructed once at process start and
/// shared via `Arc`.
#[derive(Debug)]
pub struct Clock {
    pinned: AtomicI64,
}

impl Clock {
    /// Creates a live clock.
    pub fn new() -> Self {
        Self {
            pinned: AtomicI64::new(LIVE),
        }
    }

    /// Current epoch seconds; the pinned value if a pin is active.
    pub fn now_unix(&self) -> i64 {
        let pinned = self.pinned.load(Ordering::Relaxed);
        if pinned != LIVE {
            return pinned;
        }
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    /// Pins the clock to a fixed epoch second.
    pub fn pin(&self, epoch: i64) {
        self.pinned.store(epoch, Ordering::Relaxed);
    }

    /// Releases an active pin, returning to the wall clock.
    pub fn unpin(&self) {
        self.pinned.store(LIVE, Ordering::Relaxed);
    }

    /// True while a replay pin is active.
    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::Relaxed) != LIVE
    }

    /// Epoch second of the day boundary `n` days after today (UTC+8 days).
    pub fn days_after(&self, n: i64) -> i64 {
        (self.now_unix() + DAY_PHASE_SECS + n * DAY_SECS).div_euclid(DAY_SECS) * DAY_SECS
            - DAY_PHASE_SECS
    }

    /// Seconds until the next occurrence of `offset` seconds past the day
    /// boundary. Never more than a full day.
    pub fn next_day_with_offset(&self, offset: i64) -> i64 {
        let next = self.days_after(1) + offset - self.now_unix();
        if next > DAY_SECS {
            return self.days_after(0) + offset - self.now_unix();
        }
        next
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
