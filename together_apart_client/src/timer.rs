// Cancellable one-shot timers.
//
// Both the reconnect backoff and the echo guard need "run this later unless
// something else happens first". `Scheduler` is the seam: production code uses
// `ThreadScheduler`, tests use `ManualScheduler` and advance time by hand.
//
// Cancellation is by ownership. `schedule` returns a `TimerHandle`; dropping
// the handle (or calling `cancel`) marks the timer cancelled, and a cancelled
// timer never runs its task. There is still a window where a task has already
// been picked up to run when the handle is dropped, so tasks that mutate
// shared state must also check that the state they were scheduled for is
// still current (see `EchoGuard::expire`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks after a delay.
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`, unless the returned handle is dropped
    /// first. Must not run `task` on the calling thread before returning.
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// Owner's end of a scheduled timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    // Dropped together with the handle, which wakes a sleeping timer thread.
    _wake: Option<mpsc::Sender<()>>,
}

impl TimerHandle {
    fn new(cancelled: Arc<AtomicBool>, wake: Option<mpsc::Sender<()>>) -> Self {
        Self {
            cancelled,
            _wake: wake,
        }
    }

    /// Cancel the timer. Equivalent to dropping the handle.
    pub fn cancel(self) {}

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Timer backed by one short-lived thread per scheduled task.
///
/// The thread waits on a channel with `recv_timeout`; dropping the handle
/// disconnects the channel, so a cancelled timer thread exits immediately
/// instead of sleeping out its delay.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (wake_tx, wake_rx) = mpsc::channel::<()>();
        let flag = Arc::clone(&cancelled);
        thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = wake_rx.recv_timeout(delay) {
                if !flag.load(Ordering::SeqCst) {
                    task();
                }
            }
        });
        TimerHandle::new(cancelled, Some(wake_tx))
    }
}

/// Deterministic scheduler for tests: time only moves when `advance` is
/// called, and due tasks run on the caller's thread in deadline order.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    pending: Vec<Pending>,
}

struct Pending {
    due: Duration,
    seq: u64,
    delay: Duration,
    cancelled: Arc<AtomicBool>,
    task: Task,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `by`, running every live task that falls due,
    /// including tasks scheduled by tasks run during this call. Returns how
    /// many tasks ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.lock().now + by;
        let mut ran = 0;
        while let Some(task) = self.pop_due(target) {
            task();
            ran += 1;
        }
        self.lock().now = target;
        ran
    }

    /// Number of timers that are scheduled and not cancelled.
    pub fn pending(&self) -> usize {
        self.lock()
            .pending
            .iter()
            .filter(|p| !p.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Delays, as originally requested, of every live timer in deadline order.
    pub fn pending_delays(&self) -> Vec<Duration> {
        let state = self.lock();
        let mut live: Vec<&Pending> = state
            .pending
            .iter()
            .filter(|p| !p.cancelled.load(Ordering::SeqCst))
            .collect();
        live.sort_by_key(|p| (p.due, p.seq));
        live.iter().map(|p| p.delay).collect()
    }

    fn pop_due(&self, target: Duration) -> Option<Task> {
        let mut state = self.lock();
        state
            .pending
            .retain(|p| !p.cancelled.load(Ordering::SeqCst));
        let index = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.due <= target)
            .min_by_key(|(_, p)| (p.due, p.seq))
            .map(|(i, _)| i)?;
        let pending = state.pending.swap_remove(index);
        state.now = pending.due;
        Some(pending.task)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now + delay;
        state.pending.push(Pending {
            due,
            seq,
            delay,
            cancelled: Arc::clone(&cancelled),
            task,
        });
        TimerHandle::new(cancelled, None)
    }
}
