//! Timer Abstraction
//!
//! Reconnect delays go through an injected [`Scheduler`] rather than calling
//! `tokio::time::sleep` inline. Production code uses [`TokioScheduler`];
//! tests use [`ManualScheduler`] and advance simulated time explicitly, so
//! backoff behavior is observable without wall-clock waits.
//!
//! Every scheduled task is paired with a [`TimerHandle`]. Cancelling the
//! handle guarantees the task will not start; a task that already started
//! is aborted at its next suspension point (Tokio) or allowed to finish
//! (manual).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::AbortHandle;

/// Work run when a timer fires
pub type TimerTask = BoxFuture<'static, ()>;

/// Source of delayed execution
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`, unless the returned handle is cancelled first
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

/// Cancellation handle for one scheduled task
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    fn new(cancelled: Arc<AtomicBool>, abort: Option<AbortHandle>) -> Self {
        Self { cancelled, abort }
    }

    /// Cancel the task. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    /// Whether [`cancel`](Self::cancel) was called
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tokio
// ============================================================================

/// Scheduler backed by the Tokio timer wheel
///
/// Must be used from within a Tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                task.await;
            }
        });

        TimerHandle::new(cancelled, Some(join.abort_handle()))
    }
}

// ============================================================================
// Manual
// ============================================================================

struct PendingTask {
    due: Duration,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    task: TimerTask,
}

#[derive(Default)]
struct ManualClock {
    now: Duration,
    next_seq: u64,
    tasks: Vec<PendingTask>,
}

/// Simulated-time scheduler for deterministic tests
///
/// Time only moves when [`advance`](Self::advance) is awaited. Due tasks run
/// inline, in due order (ties in scheduling order), each to completion.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    clock: Arc<Mutex<ManualClock>>,
}

impl ManualScheduler {
    /// Create a scheduler at simulated time zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated time elapsed since creation
    #[must_use]
    pub fn now(&self) -> Duration {
        self.clock.lock().now
    }

    /// Number of scheduled, uncancelled tasks
    #[must_use]
    pub fn pending(&self) -> usize {
        self.clock
            .lock()
            .tasks
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Delay until the earliest uncancelled task fires
    #[must_use]
    pub fn next_due_in(&self) -> Option<Duration> {
        let clock = self.clock.lock();
        clock
            .tasks
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .map(|t| t.due.saturating_sub(clock.now))
            .min()
    }

    /// Move simulated time forward by `by`, running every task that falls due
    ///
    /// Tasks scheduled by a running task are eligible within the same call
    /// if they fall due before the new time.
    pub async fn advance(&self, by: Duration) {
        let target = self.clock.lock().now + by;

        while let Some(task) = self.take_due(target) {
            task.await;
        }

        self.clock.lock().now = target;
    }

    fn take_due(&self, target: Duration) -> Option<TimerTask> {
        let mut clock = self.clock.lock();
        clock.tasks.retain(|t| !t.cancelled.load(Ordering::SeqCst));

        let index = clock
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= target)
            .min_by_key(|(_, t)| (t.due, t.seq))
            .map(|(i, _)| i)?;

        let pending = clock.tasks.swap_remove(index);
        clock.now = clock.now.max(pending.due);
        Some(pending.task)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut clock = self.clock.lock();

        let seq = clock.next_seq;
        clock.next_seq += 1;
        let due = clock.now + delay;
        clock.tasks.push(PendingTask {
            due,
            seq,
            cancelled: Arc::clone(&cancelled),
            task,
        });

        TimerHandle::new(cancelled, None)
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}
