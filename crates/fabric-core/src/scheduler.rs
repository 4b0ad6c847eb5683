//! Delayed scheduler: timed runnables handed off to a caller-supplied
//! work-available callback (§4.9).
//!
//! Grounded on `cpp/libjoynr/.../DelayedScheduler.h`'s shape; timers are
//! `tokio::time::sleep` tasks rather than a dedicated timer thread, since
//! the rest of the workspace already runs on a tokio runtime, and the
//! thread pool the callback hands work to is treated as an external
//! collaborator regardless (§5: "runs on pools supplied by an I/O
//! service the core does not own").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

/// A runnable accepted by [`DelayedScheduler::schedule`].
pub type Runnable = Box<dyn FnOnce() + Send>;

/// Opaque handle returned by `schedule`, usable with `unschedule`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleHandle(u64);

/// Invokes a runnable once its delay has elapsed (§4.9:
/// `onWorkAvailable`). Supplied at construction; typically hands the
/// runnable to a thread pool the scheduler itself does not own.
pub trait WorkAvailable: Send + Sync {
    fn on_work_available(&self, runnable: Runnable);
}

impl<F> WorkAvailable for F
where
    F: Fn(Runnable) + Send + Sync,
{
    fn on_work_available(&self, runnable: Runnable) {
        self(runnable)
    }
}

pub struct DelayedScheduler {
    on_work_available: Arc<dyn WorkAvailable>,
    pending: Mutex<HashMap<u64, AbortHandle>>,
    next_id: AtomicU64,
}

impl DelayedScheduler {
    pub fn new(on_work_available: Arc<dyn WorkAvailable>) -> Self {
        Self {
            on_work_available,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// `schedule(runnable, delay) -> handle` of §4.9.
    pub fn schedule(&self, runnable: Runnable, delay: Duration) -> ScheduleHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let on_work_available = self.on_work_available.clone();
        let pending_cleanup_id = id;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_work_available.on_work_available(runnable);
        });

        let mut pending = self.pending.lock();
        pending.insert(id, handle.abort_handle());
        prune_finished(&mut pending, pending_cleanup_id);
        ScheduleHandle(id)
    }

    /// `unschedule(handle)` of §4.9: best-effort. If the timer already
    /// fired, `AbortHandle::abort` on a finished task is a harmless no-op,
    /// matching the documented "runnable still runs" behavior for the
    /// already-fired case.
    pub fn unschedule(&self, handle: ScheduleHandle) {
        if let Some(abort) = self.pending.lock().remove(&handle.0) {
            abort.abort();
        }
    }

    /// `shutdown()` of §4.9: cancels all outstanding timers.
    pub fn shutdown(&self) {
        let mut pending = self.pending.lock();
        for (_, abort) in pending.drain() {
            abort.abort();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Drops bookkeeping for handles whose task has already completed, so a
/// long-running scheduler does not accumulate dead entries. Called
/// opportunistically on every `schedule`; not required for correctness.
fn prune_finished(pending: &mut HashMap<u64, AbortHandle>, just_inserted: u64) {
    pending.retain(|id, abort| *id == just_inserted || !abort.is_finished());
}
