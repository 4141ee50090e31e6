//! Task runtime core - registration, status page, and the per-executor
//! run loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use super::executor::{run_protected, ExecContext, Executor, RunOutcome};
use super::replay::ReplaySpec;
use super::status::{ExecutorReport, ExecutorStatus, CRASH_CEILING};
use crate::time::{Clock, DAY_SECS};

/// Re-poll delay for busy executors (`next_duration() == 0`).
pub const BUSY_POLL_DELAY: Duration = Duration::from_millis(400);

/// Runtime construction parameters, read once at process start.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Deployment environment tag. Executors default to enabled only in
    /// the production default (empty tag); elsewhere they must be switched
    /// on explicitly via [`TaskRuntime::set_enabled`].
    pub env: String,
    /// Backfill request; when set, `start` runs it and exits the process.
    pub replay: Option<ReplaySpec>,
}

impl RuntimeConfig {
    /// Reads `APP_ENV` and the replay variables from the environment.
    pub fn from_env() -> Self {
        Self {
            env: std::env::var("APP_ENV").unwrap_or_default(),
            replay: ReplaySpec::from_env(),
        }
    }
}

/// The executor runtime: an explicit context constructed once at process
/// start and passed to components, owning the registered executors and
/// their status records.
///
/// There is no external stop signal for an executor loop; a loop ends only
/// through a negative `next_duration` or the crash ceiling.
pub struct TaskRuntime {
    clock: Arc<Clock>,
    env: String,
    replay: Option<ReplaySpec>,
    executors: RwLock<Vec<Arc<dyn Executor>>>,
    status: DashMap<String, Arc<ExecutorStatus>>,
}

impl TaskRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_clock(config, Arc::new(Clock::new()))
    }

    /// Builds the runtime around an existing clock, shared with the
    /// components that need canonical "now".
    pub fn with_clock(config: RuntimeConfig, clock: Arc<Clock>) -> Self {
        Self {
            clock,
            env: config.env,
            replay: config.replay,
            executors: RwLock::new(Vec::new()),
            status: DashMap::new(),
        }
    }

    pub fn clock(&self) -> Arc<Clock> {
        Arc::clone(&self.clock)
    }

    /// Registers an executor and creates its default status record.
    /// The executor set is immutable once `start` has been called.
    pub fn register(&self, ex: Arc<dyn Executor>) {
        let enabled = self.env.is_empty();
        self.status
            .insert(ex.name().to_string(), Arc::new(ExecutorStatus::new(enabled)));
        self.executors.write().push(ex);
    }

    /// Overrides enabled flags by executor name; unknown names are ignored.
    pub fn set_enabled(&self, overrides: &HashMap<String, bool>) {
        for (name, enabled) in overrides {
            if let Some(status) = self.status.get(name) {
                status.set_enabled(*enabled);
            }
        }
    }

    /// Requests an early run of `name`. Best-effort and lossy: returns
    /// false for unknown executors or when a trigger is already pending.
    /// A trigger placed while the executor is mid-run is accepted and
    /// consumed at the next loop iteration, causing an immediate re-run.
    pub fn once(&self, name: &str) -> bool {
        self.status.get(name).map_or(false, |status| status.trigger())
    }

    /// Name-sorted, read-only snapshot of every registered executor:
    /// live status merged with description and progress text.
    pub async fn report(&self) -> Vec<ExecutorReport> {
        let executors = self.executors.read().clone();
        let mut rows = Vec::with_capacity(executors.len());
        for ex in executors {
            let (enabled, state) = match self.status.get(ex.name()) {
                Some(status) => (status.enabled(), status.snapshot()),
                None => continue,
            };
            rows.push(ExecutorReport {
                name: ex.name().to_string(),
                description: ex.description().to_string(),
                enabled,
                next_gmt: state.next_gmt,
                last_gmt: state.last_gmt,
                last_spent: state.last_spent,
                last_run_id: state.last_run_id,
                crashed: state.crashed,
                progress: ex.progress().await,
            });
        }
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Starts the runtime: runs the replay path if one is configured
    /// (terminating the process afterwards), otherwise spawns one
    /// independent run loop per enabled executor.
    pub async fn start(&self) {
        if let Some(spec) = self.replay.clone() {
            self.replay(&spec).await;
            std::process::exit(0);
        }

        let executors = self.executors.read().clone();
        for ex in executors {
            let Some(status) = self.status.get(ex.name()).map(|s| Arc::clone(&s)) else {
                continue;
            };
            if !status.enabled() {
                continue;
            }
            info!(name = ex.name(), "Registering executor loop");
            tokio::spawn(run_loop(ex, status, Arc::clone(&self.clock)));
        }
    }

    /// Runs the named executor once per simulated day across the closed
    /// range, with the clock pinned to each day. Used by `start` for
    /// backfills; public so deterministic reprocessing can be driven
    /// directly.
    pub async fn replay(&self, spec: &ReplaySpec) {
        tokio::time::sleep(spec.warmup).await;

        let mut day = if spec.start > 0 {
            spec.start
        } else {
            self.clock.days_after(0)
        };
        let end = if spec.end > 0 { spec.end } else { day };
        let executors = self.executors.read().clone();

        while day <= end {
            self.clock.pin(day);
            info!(day, executor = %spec.executor, "Replay day start");

            let mut found = false;
            for ex in &executors {
                if ex.name() != spec.executor {
                    continue;
                }
                found = true;
                let ctx = ExecContext::new(ex.name(), Arc::clone(&self.clock));
                match ex.process(&ctx).await {
                    Ok(()) => info!(day, run_id = %ctx.run_id, "Replay day complete"),
                    Err(err) => error!(day, run_id = %ctx.run_id, %err, "Replay day failed"),
                }
            }
            if !found {
                error!(day, executor = %spec.executor, "Replay executor not registered");
            }
            day += DAY_SECS;
        }
        self.clock.unpin();
    }
}

/// One executor's run loop. Never returns except through retirement
/// (negative `next_duration`) or the crash ceiling.
async fn run_loop(ex: Arc<dyn Executor>, status: Arc<ExecutorStatus>, clock: Arc<Clock>) {
    // The loop is the sole consumer of the trigger slot.
    let Some(mut trigger) = status.take_trigger() else {
        warn!(name = ex.name(), "Executor loop already running");
        return;
    };

    loop {
        let ctx = ExecContext::new(ex.name(), Arc::clone(&clock));
        let next = ex.next_duration();
        if next < 0 {
            info!(name = ex.name(), "Executor retired itself");
            break;
        }

        let timed = next > 0;
        let wait = if timed {
            status.update(|st| st.next_gmt = clock.now_unix() + next);
            info!(
                name = ex.name(),
                run_id = %ctx.run_id,
                wait_secs = next,
                "Executor waiting"
            );
            Duration::from_secs(next as u64)
        } else {
            BUSY_POLL_DELAY
        };

        // Manual trigger wins the race against the timer.
        tokio::select! {
            _ = trigger.recv() => {}
            _ = tokio::time::sleep(wait) => {}
        }

        if timed {
            info!(name = ex.name(), run_id = %ctx.run_id, "Executor starting");
        }
        status.update(|st| st.last_run_id = ctx.run_id.clone());

        let started_unix = clock.now_unix();
        let started = Instant::now();
        match run_protected(ex.as_ref(), &ctx).await {
            RunOutcome::Failure(reason) => {
                let crashed = status.update(|st| {
                    st.crashed += 1;
                    st.crashed
                });
                warn!(
                    name = ex.name(),
                    run_id = %ctx.run_id,
                    crashed,
                    %reason,
                    "Executor run failed"
                );
                if crashed > CRASH_CEILING {
                    error!(
                        name = ex.name(),
                        crashed, "Executor crash ceiling exceeded, retired until restart"
                    );
                    break;
                }
            }
            RunOutcome::Success => {
                if timed {
                    let spent_ms = started.elapsed().as_secs_f64() * 1e3;
                    let spent = format!("{spent_ms:.4}");
                    status.update(|st| {
                        st.last_gmt = started_unix;
                        st.last_spent = spent.clone();
                    });
                    info!(
                        name = ex.name(),
                        run_id = %ctx.run_id,
                        spent_ms = %spent,
                        "Executor run complete"
                    );
                }
            }
        }
    }
}
