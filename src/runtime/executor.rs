//! Executor trait, run context, and the panic recovery boundary.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use uuid::Uuid;

use crate::delay_queue::DelayQueueError;
use crate::store::StoreError;
use crate::time::Clock;

/// Failure reported by an executor run.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExecError {
    message: String,
}

impl ExecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<StoreError> for ExecError {
    fn from(err: StoreError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<DelayQueueError> for ExecError {
    fn from(err: DelayQueueError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for ExecError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Per-run context handed to [`Executor::process`].
///
/// Carries the run id (also recorded in the executor's status so logs of
/// the previous run can be found from the status page) and the runtime
/// clock, which is the canonical "now" during replay.
pub struct ExecContext {
    pub name: String,
    pub run_id: String,
    pub clock: Arc<Clock>,
}

impl ExecContext {
    pub(crate) fn new(name: &str, clock: Arc<Clock>) -> Self {
        Self {
            name: name.to_string(),
            run_id: Uuid::new_v4().to_string(),
            clock,
        }
    }
}

/// A named, independently scheduled recurring unit of work.
///
/// Registered once with the [`TaskRuntime`](super::TaskRuntime); the set is
/// immutable after `start`. Timeouts on calls to external collaborators are
/// the executor's own responsibility - the runtime imposes none.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    /// Unique executor name, also the status-page key.
    fn name(&self) -> &str;

    /// Human-readable description for the status page.
    fn description(&self) -> &str;

    /// Seconds until the next run.
    ///
    /// Negative retires the loop permanently. Zero marks a busy executor
    /// (for example a queue drainer) that is re-polled on a short fixed
    /// delay without "waiting" log noise. Positive sleeps that many
    /// seconds, racing an early manual trigger.
    fn next_duration(&self) -> i64;

    /// Runs one iteration of the work.
    async fn process(&self, ctx: &ExecContext) -> Result<(), ExecError>;

    /// Progress text for the status page, controlled by the executor.
    async fn progress(&self) -> String {
        String::new()
    }
}

/// Outcome of one protected executor run.
///
/// Panics and returned errors are folded into [`RunOutcome::Failure`] so
/// crash accounting is uniform; the "fatal" decision (crash ceiling
/// exceeded) belongs to the run loop, not the boundary.
#[derive(Debug)]
pub enum RunOutcome {
    Success,
    Failure(String),
}

/// Runs `process` inside a recovery boundary that converts panics into a
/// generic failure.
pub(crate) async fn run_protected(ex: &dyn Executor, ctx: &ExecContext) -> RunOutcome {
    match AssertUnwindSafe(ex.process(ctx)).catch_unwind().await {
        Ok(Ok(())) => RunOutcome::Success,
        Ok(Err(err)) => RunOutcome::Failure(err.to_string()),
        Err(payload) => RunOutcome::Failure(panic_message(payload)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panic: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panic: {msg}")
    } else {
        "panic".to_string()
    }
}
