//! Single-worker FIFO task queue with a completion barrier
//!
//! Decouples background I/O (transform, load, relocate) from the synchronous
//! acquisition path. Guarantees:
//! - At most one worker task is alive per queue instance at any time.
//! - Tasks execute exactly once each, in global FIFO submission order.
//! - A failing (or panicking) task is logged and dropped without terminating
//!   the worker or affecting other pending tasks.
//! - [`TaskQueue::wait_for_completion`] only returns once the unfinished count
//!   reaches zero, including tasks enqueued from inside other tasks.
//!
//! The worker exits when the queue stays empty for one idle-poll interval and
//! nothing is unfinished; the next enqueue spawns a fresh worker.
//!
//! # Example
//!
//! ```no_run
//! use portal_etl::task_queue::TaskQueue;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let queue = TaskQueue::new(Duration::from_secs(1), None);
//! queue.enqueue("greet", Arc::new(|| Box::pin(async {
//!     println!("hello from the worker");
//!     Ok(())
//! })));
//! queue.wait_for_completion().await;
//! # }
//! ```

use crate::error::{Error, Result};
use crate::types::TaskId;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error};

/// Future produced by invoking a task operation
pub type TaskFuture = BoxFuture<'static, Result<()>>;

/// A deferred operation
///
/// Stored as `Fn` (not `FnOnce`) because the retry layer re-invokes the same
/// logical task on re-enqueue.
pub type TaskOp = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Hook invoked on the worker after a task execution fails
///
/// Receives the wrapped error and a clone of the failed task; a hook may
/// re-enqueue the task (this is how retry works). Runs before the task is
/// counted as finished, so `wait_for_completion` can never slip through
/// between a failure and its re-enqueue.
pub type FailureHook = Arc<dyn Fn(Error, Task) -> BoxFuture<'static, ()> + Send + Sync>;

/// A deferred unit of work: operation, stable identity, optional failure hook
///
/// Immutable once enqueued; owned exclusively by the queue from enqueue until
/// consumed. Cloning shares the operation, so a re-enqueued clone is the same
/// logical task under the same [`TaskId`].
#[derive(Clone)]
pub struct Task {
    id: TaskId,
    label: String,
    op: TaskOp,
    on_failure: Option<FailureHook>,
}

impl Task {
    /// Build a task with an explicit id (obtained from [`TaskQueue::next_id`])
    pub fn new(
        id: TaskId,
        label: impl Into<String>,
        op: TaskOp,
        on_failure: Option<FailureHook>,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            op,
            on_failure,
        }
    }

    /// Stable task identity
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Human-readable label used in log entries
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Mutable queue state, all behind one mutex
///
/// The worker-spawn decision and the pending FIFO share the lock so two
/// concurrent producers can never both observe "no worker" and spawn twice.
struct QueueState {
    pending: VecDeque<Task>,
    worker_alive: bool,
    /// Pending plus in-flight tasks; drives the completion barrier
    unfinished: usize,
}

struct QueueInner {
    state: Mutex<QueueState>,
    /// Signalled on enqueue so an idle worker wakes immediately
    work_available: Notify,
    /// Signalled when `unfinished` drops to zero
    all_done: Notify,
    next_id: AtomicU64,
    idle_poll: Duration,
    task_timeout: Option<Duration>,
}

/// Single-worker FIFO background executor
///
/// Cheap to clone; clones share the same queue instance.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// Create a queue
    ///
    /// `idle_poll` bounds how long the worker waits on an empty queue before
    /// re-checking whether it should exit. `task_timeout` optionally bounds
    /// each task's execution time; `None` means a task may run forever.
    pub fn new(idle_poll: Duration, task_timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    worker_alive: false,
                    unfinished: 0,
                }),
                work_available: Notify::new(),
                all_done: Notify::new(),
                next_id: AtomicU64::new(1),
                idle_poll,
                task_timeout,
            }),
        }
    }

    /// Reserve the next task id without enqueueing anything
    ///
    /// Lets callers (the retry layer) know a task's identity before building
    /// closures that capture it.
    pub fn next_id(&self) -> TaskId {
        TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Enqueue an operation; non-blocking, safe from any context
    ///
    /// Appends to the FIFO and makes sure a worker is running. Returns the
    /// task's assigned id.
    pub fn enqueue(&self, label: impl Into<String>, op: TaskOp) -> TaskId {
        let id = self.next_id();
        self.enqueue_task(Task::new(id, label, op, None));
        id
    }

    /// Enqueue a pre-built task, preserving its id
    ///
    /// Used by failure hooks to push the same logical task to the back of the
    /// queue. The liveness check and the spawn decision happen under the state
    /// mutex, so concurrent producers can never start two workers.
    pub fn enqueue_task(&self, task: Task) {
        let spawn_worker = {
            let mut state = self.lock_state();
            state.pending.push_back(task);
            state.unfinished += 1;
            if state.worker_alive {
                false
            } else {
                state.worker_alive = true;
                true
            }
        };
        self.inner.work_available.notify_one();
        if spawn_worker {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(worker_loop(inner));
        }
    }

    /// Number of tasks not yet finished (pending plus in-flight)
    pub fn unfinished(&self) -> usize {
        self.lock_state().unfinished
    }

    /// Whether a worker task is currently alive for this queue
    pub fn is_worker_alive(&self) -> bool {
        self.lock_state().worker_alive
    }

    /// Block until every enqueued task has finished
    ///
    /// Accounts for tasks enqueued during execution of other tasks: the count
    /// is incremented by `enqueue` before the worker decrements the enclosing
    /// task, so recursive submission can never make this return early.
    pub async fn wait_for_completion(&self) {
        loop {
            // Register before checking; `all_done` uses notify_waiters, which
            // does not store a permit for late arrivals.
            let notified = self.inner.all_done.notified();
            if self.lock_state().unfinished == 0 {
                return;
            }
            notified.await;
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // The mutex is never held across an await and task ops run outside it,
        // so poisoning can only follow a bug in this module itself.
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("TaskQueue")
            .field("pending", &state.pending.len())
            .field("unfinished", &state.unfinished)
            .field("worker_alive", &state.worker_alive)
            .finish()
    }
}

fn lock_state(inner: &QueueInner) -> std::sync::MutexGuard<'_, QueueState> {
    match inner.state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn worker_loop(inner: Arc<QueueInner>) {
    debug!("queue worker started");
    loop {
        let task = lock_state(&inner).pending.pop_front();
        match task {
            Some(task) => execute_task(&inner, task).await,
            None => {
                let wakeup = inner.work_available.notified();
                if tokio::time::timeout(inner.idle_poll, wakeup).await.is_err() {
                    // Re-check under the mutex: a task may be mid-flight in a
                    // failure hook and about to be re-queued.
                    let mut state = lock_state(&inner);
                    if state.unfinished == 0 && state.pending.is_empty() {
                        state.worker_alive = false;
                        drop(state);
                        debug!("queue worker exiting, no work left");
                        break;
                    }
                }
            }
        }
    }
}

async fn execute_task(inner: &Arc<QueueInner>, task: Task) {
    debug!(task_id = task.id.0, label = %task.label, "executing deferred task");

    let fut = AssertUnwindSafe((task.op)()).catch_unwind();
    let outcome = match inner.task_timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Ok(Err(Error::Other(format!(
                "execution exceeded {}s",
                limit.as_secs()
            )))),
        },
        None => fut.await,
    };

    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(panic) => Some(Error::Other(panic_message(panic))),
    };

    if let Some(cause) = failure {
        let wrapped = Error::QueueTask {
            id: task.id,
            label: task.label.clone(),
            source: Box::new(cause),
        };
        error!(task_id = task.id.0, label = %task.label, error = %wrapped, "deferred task failed");
        if let Some(hook) = task.on_failure.clone() {
            // The hook may re-enqueue; this happens before the decrement below
            // so the unfinished count never dips to zero mid-retry.
            hook(wrapped, task.clone()).await;
        }
    }

    let all_done = {
        let mut state = lock_state(inner);
        state.unfinished -= 1;
        state.unfinished == 0
    };
    if all_done {
        inner.all_done.notify_waiters();
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("task panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("task panicked: {msg}")
    } else {
        "task panicked".to_string()
    }
}
