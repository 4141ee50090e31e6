//! Replay configuration parsed from the process environment.
//!
//! Format: `REPLAY=executor [REPLAY_START=YYYYMMDD] [REPLAY_END=YYYYMMDD]
//! [REPLAY_SLEEP=secs]`. The runtime re-runs the named executor once per
//! simulated day across the closed date range, with the clock pinned to
//! each day, then terminates the process. Dates are interpreted in UTC+8,
//! matching the runtime's day phase.

use std::time::Duration;

use chrono::{FixedOffset, NaiveDate};

use crate::time::DAY_PHASE_SECS;

/// A deterministic backfill request: one executor, a closed day range, and
/// an optional warmup sleep before the first day.
#[derive(Debug, Clone)]
pub struct ReplaySpec {
    /// Name of the executor to re-run.
    pub executor: String,
    /// First simulated day (epoch seconds at the day boundary); 0 = today.
    pub start: i64,
    /// Last simulated day (inclusive); 0 = same as start.
    pub end: i64,
    /// Sleep before the first day, for collaborators to come up.
    pub warmup: Duration,
}

impl ReplaySpec {
    /// Reads the replay environment variables; `None` when no replay is
    /// requested.
    pub fn from_env() -> Option<Self> {
        let executor = std::env::var("REPLAY").ok().filter(|s| !s.is_empty())?;
        let start = std::env::var("REPLAY_START")
            .ok()
            .and_then(|raw| parse_day(&raw))
            .unwrap_or(0);
        let end = std::env::var("REPLAY_END")
            .ok()
            .and_then(|raw| parse_day(&raw))
            .unwrap_or(0);
        let warmup = std::env::var("REPLAY_SLEEP")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map_or(Duration::ZERO, Duration::from_secs);

        Some(Self {
            executor,
            start,
            end,
            warmup,
        })
    }
}

/// Parses `YYYYMMDD` into the epoch second of that day's UTC+8 boundary.
fn parse_day(raw: &str) -> Option<i64> {
    let date = NaiveDate::parse_from_str(raw, "%Y%m%d").ok()?;
    let offset = FixedOffset::east_opt(DAY_PHASE_SECS as i32)?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(midnight.and_local_timezone(offset).single()?.timestamp())
}
