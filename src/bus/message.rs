//! Message wire model and period limits.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default window phase: day boundaries in UTC+8.
pub const DEFAULT_PHASE_SECS: i64 = 8 * 3600;

/// A quota of at most `limit` occurrences per rolling window, or per
/// lifetime when `period == -1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodLimit {
    /// Window phase offset in seconds.
    #[serde(default)]
    pub phase: i64,
    /// Window length in seconds; `-1` counts over the message's lifetime.
    #[serde(default)]
    pub period: i64,
    /// Maximum occurrences; zero or negative disables the limit.
    #[serde(default)]
    pub limit: i64,
}

impl PeriodLimit {
    /// At most `limit` occurrences per `period` seconds, phase-aligned to
    /// UTC+8 day boundaries.
    pub fn windowed(period: i64, limit: i64) -> Self {
        Self {
            phase: DEFAULT_PHASE_SECS,
            period,
            limit,
        }
    }

    /// At most `limit` occurrences over the message's entire lifetime.
    pub fn lifetime(limit: i64) -> Self {
        Self::windowed(-1, limit)
    }

    pub fn is_lifetime(&self) -> bool {
        self.period == -1
    }

    /// The active window `[start, start + period)` containing `now`.
    /// Consecutive windows tile time exactly. `period` must be positive;
    /// the send gate screens out non-positive windows before calling this.
    pub fn window(&self, now: i64) -> (i64, i64) {
        let start = (now + self.phase).div_euclid(self.period) * self.period - self.phase;
        (start, start + self.period)
    }
}

/// One deliverable message.
///
/// JSON-serialized as the delay-queue payload; unknown or defaulted fields
/// are omitted to keep stored members compact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// Optional sub-key distinguishing instances within a group.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group_key: String,
    /// Free-form payload handed to the sender.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, String>,
    /// Target application for multi-app senders.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,
    #[serde(default)]
    pub period_limit: PeriodLimit,
    /// Restricts delivery to whitelisted user ids.
    #[serde(default)]
    pub whitelist_only: bool,
    #[serde(default)]
    pub sent: bool,
    /// Why the send failed, when it did.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sent_err: String,
}

impl Message {
    /// Group identity used for rate limiting and auditing.
    pub fn group_id(&self) -> String {
        if self.group_key.is_empty() {
            return self.group.clone();
        }
        format!("{}{}", self.group, self.group_key)
    }
}
