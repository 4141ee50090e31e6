//! Live executor status records and status-page snapshots.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;

/// Consecutive-failure budget; a loop retires once its crash count
/// exceeds this.
pub const CRASH_CEILING: u32 = 10;

/// Mutable part of an executor's status, written by its owning loop and
/// snapshotted by status-page queries. Momentarily inconsistent reads are
/// acceptable here.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusState {
    /// Next scheduled run (epoch seconds); 0 until first scheduled.
    pub next_gmt: i64,
    /// Start of the last completed timed run (epoch seconds).
    pub last_gmt: i64,
    /// Duration of the last completed timed run, milliseconds with four
    /// decimal places.
    pub last_spent: String,
    /// Run id of the last started run, for log correlation.
    pub last_run_id: String,
    /// Failures since process start; never reset while the process lives.
    pub crashed: u32,
}

/// Status record for one registered executor.
///
/// Created at registration, mutated every loop iteration, never deleted.
/// Also owns the single-slot manual-trigger channel.
pub struct ExecutorStatus {
    enabled: AtomicBool,
    state: RwLock<StatusState>,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl ExecutorStatus {
    pub(crate) fn new(enabled: bool) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        Self {
            enabled: AtomicBool::new(enabled),
            state: RwLock::new(StatusState::default()),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Requests an early run. Intentionally lossy: the trigger is a
    /// single-slot flag, so this returns false if a trigger is already
    /// pending; triggers are never queued. A trigger is also accepted
    /// while a run is in progress, in which case it is consumed at the
    /// next loop iteration and causes an immediate re-run.
    pub fn trigger(&self) -> bool {
        self.trigger_tx.try_send(()).is_ok()
    }

    /// Hands the trigger receiver to the run loop. Only the first caller
    /// gets it; a loop is the sole consumer of its trigger slot.
    pub(crate) fn take_trigger(&self) -> Option<mpsc::Receiver<()>> {
        self.trigger_rx.lock().take()
    }

    pub fn snapshot(&self) -> StatusState {
        self.state.read().clone()
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut StatusState) -> R) -> R {
        f(&mut self.state.write())
    }
}

/// One name-sorted row of the status page: live status merged with the
/// executor's description and current progress text.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorReport {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub next_gmt: i64,
    pub last_gmt: i64,
    pub last_spent: String,
    pub last_run_id: String,
    pub crashed: u32,
    pub progress: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_slot_holds_one_pending_trigger() {
        let status = ExecutorStatus::new(true);
        assert!(status.trigger());
        // Slot already full.
        assert!(!status.trigger());

        let mut rx = status.take_trigger().unwrap();
        rx.recv().await.unwrap();

        // Consumed; a new trigger fits again.
        assert!(status.trigger());
    }

    #[test]
    fn trigger_receiver_taken_once() {
        let status = ExecutorStatus::new(true);
        assert!(status.take_trigger().is_some());
        assert!(status.take_trigger().is_none());
    }

    #[test]
    fn update_and_snapshot() {
        let status = ExecutorStatus::new(false);
        status.update(|st| {
            st.crashed = 3;
            st.last_spent = "12.5000".to_string();
        });

        let snap = status.snapshot();
        assert_eq!(snap.crashed, 3);
        assert_eq!(snap.last_spent, "12.5000");
        assert!(!status.enabled());
    }
}
