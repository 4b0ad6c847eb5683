//! Task sequencer: a single worker that consumes closures producing
//! futures, FIFO, one in flight at a time, with per-task deadlines
//! (§4.8).
//!
//! Grounded on `cpp/libjoynr/util/include/joynr/TaskSequencer.h`'s shape
//! (add/cancel, a deadline + timeout callback per task, idempotent cancel
//! that releases captured state), re-expressed over a `tokio::spawn`
//! worker instead of a dedicated OS thread + condition variable, since the
//! rest of this workspace is already tokio-async and a condvar-guarded
//! thread would need its own bridge back into async callers.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, warn};

use crate::routing_table::now_ms;

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A task accepted by [`TaskSequencer::add`] (§3 "Task"): a producer
/// closure, an absolute deadline, and a timeout closure invoked in place
/// of running the task if the deadline has already passed by the time the
/// sequencer would start it.
pub struct SequencedTask {
    producer: Box<dyn FnOnce() -> TaskFuture + Send>,
    deadline_ms: i64,
    on_timeout: Box<dyn FnOnce() + Send>,
}

impl SequencedTask {
    pub fn new(
        producer: impl FnOnce() -> TaskFuture + Send + 'static,
        deadline_ms: i64,
        on_timeout: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            producer: Box::new(producer),
            deadline_ms,
            on_timeout: Box::new(on_timeout),
        }
    }
}

struct SequencerState {
    tasks: VecDeque<SequencedTask>,
    current: Option<AbortHandle>,
}

/// Serializes asynchronous tasks with per-task deadlines (§4.8).
/// `add` never blocks; the worker runs on a background tokio task spawned
/// at construction.
pub struct TaskSequencer {
    state: Arc<Mutex<SequencerState>>,
    notify: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl TaskSequencer {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(SequencerState {
            tasks: VecDeque::new(),
            current: None,
        }));
        let notify = Arc::new(Notify::new());
        let cancelled = Arc::new(AtomicBool::new(false));

        let worker = tokio::spawn(run_worker(state.clone(), notify.clone(), cancelled.clone()));

        Self {
            state,
            notify,
            cancelled,
            worker,
        }
    }

    /// `add(task)` of §4.8: O(1), never blocks the submitter. Silently
    /// drops the task if the sequencer has already been cancelled, per
    /// "after cancel no further tasks run, even if previously enqueued."
    pub fn add(&self, task: SequencedTask) {
        if self.cancelled.load(Ordering::Acquire) {
            warn!("task submitted after cancel, dropping");
            return;
        }
        self.state.lock().tasks.push_back(task);
        self.notify.notify_one();
    }

    /// `cancel()` of §4.8: idempotent. Swaps the task queue with an
    /// empty one and aborts any in-flight task so all closure-captured
    /// memory is released synchronously before this call returns.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock();
        state.tasks = VecDeque::new();
        if let Some(current) = state.current.take() {
            current.abort();
        }
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for TaskSequencer {
    fn drop(&mut self) {
        self.cancel();
        self.worker.abort();
    }
}

impl Default for TaskSequencer {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(state: Arc<Mutex<SequencerState>>, notify: Arc<Notify>, cancelled: Arc<AtomicBool>) {
    loop {
        if cancelled.load(Ordering::Acquire) {
            return;
        }

        let next = state.lock().tasks.pop_front();
        let task = match next {
            Some(task) => task,
            None => {
                notify.notified().await;
                continue;
            }
        };

        if now_ms() > task.deadline_ms {
            warn!("task past deadline at dequeue, invoking on-timeout closure");
            (task.on_timeout)();
            continue;
        }

        let future = (task.producer)();
        let handle = tokio::spawn(future);
        state.lock().current = Some(handle.abort_handle());

        match handle.await {
            Ok(()) => {}
            Err(join_error) if join_error.is_cancelled() => {
                // cancel() aborted us; loop head will observe `cancelled` and exit.
            }
            Err(join_error) => {
                error!(%join_error, "sequenced task panicked, continuing with next task");
            }
        }

        state.lock().current = None;
    }
}
