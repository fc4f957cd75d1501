//! Deferred-execution facility for expiration checks.
//!
//! Delivery is at-least-once and cancellation is best effort. Whoever handles
//! a delivered [`TimeoutCheck`] must compare its baseline against the current
//! session before acting on it.

use crate::clock::Clock;
use crate::model::{Baseline, SessionId, TaskHandle};
use chrono::{DateTime, Utc};
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};

/// Payload delivered when a scheduled check fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_new::new)]
pub struct TimeoutCheck {
    /// Session to examine.
    pub session_id: SessionId,
    /// Turn the check was scheduled for.
    pub baseline: Baseline,
}

/// The facility could not accept a task.
#[derive(Debug, Clone, Display, Error)]
#[display("Scheduler error: {} at {}:{}", message, file, line)]
pub struct SchedulerError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl SchedulerError {
    /// Creates a new scheduler error.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }
}

/// Schedules and cancels deferred expiration checks.
pub trait TaskScheduler: Send + Sync {
    /// Arranges for `check` to be delivered at or after `at`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the task could not be registered.
    fn schedule(&self, at: DateTime<Utc>, check: TimeoutCheck) -> Result<TaskHandle, SchedulerError>;

    /// Best-effort cancellation. Unknown or already-fired handles are ignored.
    fn cancel(&self, handle: &TaskHandle);
}

type Timers = Arc<Mutex<HashMap<TaskHandle, AbortHandle>>>;

/// Sleeps on the tokio runtime and delivers fired checks into a channel.
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<TimeoutCheck>,
    clock: Arc<dyn Clock>,
    timers: Timers,
    next_id: AtomicU64,
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl TokioScheduler {
    /// Creates a scheduler and the receiver fired checks arrive on.
    #[instrument(skip(clock))]
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<TimeoutCheck>) {
        let (tx, rx) = mpsc::unbounded_channel();
        info!("Creating tokio timeout scheduler");
        let scheduler = Self {
            tx,
            clock,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        };
        (scheduler, rx)
    }

    /// Number of timers that have neither fired nor been cancelled.
    pub fn outstanding(&self) -> usize {
        self.timers.lock().map(|timers| timers.len()).unwrap_or(0)
    }
}

impl TaskScheduler for TokioScheduler {
    #[instrument(skip(self, check), fields(session_id = %check.session_id, at = %at))]
    fn schedule(&self, at: DateTime<Utc>, check: TimeoutCheck) -> Result<TaskHandle, SchedulerError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SchedulerError::new(format!("No tokio runtime: {}", e)))?;

        let handle = TaskHandle(format!(
            "timeout-{}",
            self.next_id.fetch_add(1, Ordering::Relaxed)
        ));
        let delay = (at - self.clock.now()).to_std().unwrap_or_default();

        let mut timers = self
            .timers
            .lock()
            .map_err(|_| SchedulerError::new("Timer table lock poisoned"))?;

        let tx = self.tx.clone();
        let table = Arc::clone(&self.timers);
        let key = handle.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut timers) = table.lock() {
                timers.remove(&key);
            }
            debug!(handle = %key, "Timeout check fired");
            if tx.send(check).is_err() {
                warn!(handle = %key, "Timeout listener is gone, dropping check");
            }
        });
        timers.insert(handle.clone(), task.abort_handle());

        debug!(handle = %handle, delay_ms = delay.as_millis() as u64, "Timeout check scheduled");
        Ok(handle)
    }

    #[instrument(skip(self), fields(handle = %handle))]
    fn cancel(&self, handle: &TaskHandle) {
        let removed = match self.timers.lock() {
            Ok(mut timers) => timers.remove(handle),
            Err(_) => {
                warn!("Timer table lock poisoned, cannot cancel");
                None
            }
        };
        match removed {
            Some(task) => {
                task.abort();
                debug!("Timeout check cancelled");
            }
            None => debug!("Nothing to cancel, check already fired or unknown"),
        }
    }
}

/// A scheduled check as seen by [`RecordingScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledCheck {
    /// Handle returned to the caller.
    pub handle: TaskHandle,
    /// Requested fire time.
    pub at: DateTime<Utc>,
    /// Payload.
    pub check: TimeoutCheck,
}

/// Records schedules and cancellations without ever firing.
///
/// Callers deliver checks themselves, which makes duplicate and late fires
/// easy to reproduce.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    scheduled: Mutex<Vec<ScheduledCheck>>,
    cancelled: Mutex<Vec<TaskHandle>>,
    failing: AtomicBool,
    next_id: AtomicU64,
}

impl RecordingScheduler {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every check scheduled so far, oldest first.
    pub fn scheduled(&self) -> Vec<ScheduledCheck> {
        self.scheduled
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// The most recently scheduled check.
    pub fn last(&self) -> Option<ScheduledCheck> {
        self.scheduled().pop()
    }

    /// Every handle passed to `cancel`, in order.
    pub fn cancelled(&self) -> Vec<TaskHandle> {
        self.cancelled
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Makes subsequent `schedule` calls fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl TaskScheduler for RecordingScheduler {
    fn schedule(&self, at: DateTime<Utc>, check: TimeoutCheck) -> Result<TaskHandle, SchedulerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SchedulerError::new("Scheduler unavailable"));
        }
        let handle = TaskHandle(format!(
            "task-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst) + 1
        ));
        let mut scheduled = self
            .scheduled
            .lock()
            .map_err(|_| SchedulerError::new("Recorder lock poisoned"))?;
        scheduled.push(ScheduledCheck {
            handle: handle.clone(),
            at,
            check,
        });
        Ok(handle)
    }

    fn cancel(&self, handle: &TaskHandle) {
        if let Ok(mut cancelled) = self.cancelled.lock() {
            cancelled.push(handle.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use chrono::Duration;

    fn check(ply: usize) -> TimeoutCheck {
        TimeoutCheck::new(
            "s1".to_string(),
            Baseline {
                turn: "alice".to_string(),
                last_move_at: Utc::now(),
                ply,
            },
        )
    }

    #[tokio::test]
    async fn test_due_check_is_delivered() {
        let (scheduler, mut rx) = TokioScheduler::new(Arc::new(SystemClock));
        let expected = check(1);
        scheduler
            .schedule(Utc::now() - Duration::seconds(1), expected.clone())
            .expect("Schedule");
        let fired = rx.recv().await.expect("Delivered");
        assert_eq!(fired, expected);
    }

    #[tokio::test]
    async fn test_cancelled_check_is_not_delivered() {
        let (scheduler, mut rx) = TokioScheduler::new(Arc::new(SystemClock));
        let handle = scheduler
            .schedule(Utc::now() + Duration::milliseconds(50), check(1))
            .expect("Schedule");
        scheduler.cancel(&handle);
        assert_eq!(scheduler.outstanding(), 0);

        let waited = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await;
        assert!(waited.is_err(), "Cancelled check must not fire");
    }

    #[tokio::test]
    async fn test_cancel_after_fire_is_harmless() {
        let (scheduler, mut rx) = TokioScheduler::new(Arc::new(SystemClock));
        let handle = scheduler
            .schedule(Utc::now(), check(1))
            .expect("Schedule");
        rx.recv().await.expect("Delivered");
        scheduler.cancel(&handle);
        scheduler.cancel(&handle);
    }

    #[test]
    fn test_schedule_outside_runtime_fails() {
        let (scheduler, _rx) = TokioScheduler::new(Arc::new(SystemClock));
        assert!(scheduler.schedule(Utc::now(), check(1)).is_err());
    }

    #[test]
    fn test_recorder_hands_out_distinct_handles() {
        let recorder = RecordingScheduler::new();
        let a = recorder.schedule(Utc::now(), check(1)).expect("Schedule");
        let b = recorder.schedule(Utc::now(), check(2)).expect("Schedule");
        assert_ne!(a, b);
        recorder.cancel(&a);
        assert_eq!(recorder.cancelled(), vec![a]);
        assert_eq!(recorder.scheduled().len(), 2);
    }
}
