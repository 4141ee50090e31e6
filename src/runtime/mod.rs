//! Executor runtime.
//!
//! The runtime owns a set of named recurring [`Executor`]s and runs each in
//! its own tokio task. Each loop asks its executor how long to wait, races
//! that wait against a lossy manual trigger, runs the work inside a panic
//! recovery boundary, and keeps a live status record that a status page can
//! snapshot at any time.
//!
//! # Core Concepts
//!
//! - **Executor**: a named, independently scheduled recurring unit of work.
//!   A negative `next_duration` retires its loop; zero marks a busy executor
//!   re-polled on a short fixed delay.
//!
//! - **Crash ceiling**: failures (returned errors and caught panics alike)
//!   accumulate per executor; past [`CRASH_CEILING`] the loop retires until
//!   process restart. The count never resets while the process lives.
//!
//! - **Replay**: when a [`ReplaySpec`] is configured the runtime pins its
//!   clock to each day of a closed date range, runs one named executor
//!   synchronously per day, and terminates the process.

mod core;
mod executor;
mod replay;
mod status;

pub use self::core::{RuntimeConfig, TaskRuntime, BUSY_POLL_DELAY};
pub use executor::{ExecContext, ExecError, Executor, RunOutcome};
pub use replay::ReplaySpec;
pub use status::{ExecutorReport, ExecutorStatus, StatusState, CRASH_CEILING};
