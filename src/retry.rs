//! Bounded per-task retry on top of the task queue
//!
//! [`RetryQueue`] wraps a [`TaskQueue`] and re-enqueues a failed task at the
//! back of the FIFO until its attempt budget is exhausted, after which the
//! task is dropped with a terminal log entry. Retry identity is the stable
//! [`TaskId`] assigned at enqueue time, never argument equality, so two
//! logical tasks sharing arguments can never share an attempt counter.
//!
//! Because retries re-enter the same single-worker FIFO, concurrent duplicate
//! retries of one logical task are structurally impossible, and a retried
//! task never blocks other pending work; it waits its turn behind it.

use crate::error::Error;
use crate::task_queue::{FailureHook, Task, TaskOp, TaskQueue};
use crate::types::TaskId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Hook invoked once when a task exhausts its retries and is dropped
pub type TerminalFailureHook = Arc<dyn Fn(TaskId, &str, &Error) + Send + Sync>;

/// Attempt counters keyed by stable task id
///
/// An entry is created on a task's first failure and removed on terminal
/// success or terminal exhaustion.
type RetryState = Arc<Mutex<HashMap<TaskId, u32>>>;

/// Task queue with bounded per-task retry
///
/// Cheap to clone; clones share the same underlying queue and retry state.
#[derive(Clone)]
pub struct RetryQueue {
    queue: TaskQueue,
    max_retries: u32,
    attempts: RetryState,
    on_terminal_failure: Option<TerminalFailureHook>,
}

impl RetryQueue {
    /// Wrap a queue with an attempt budget of `max_retries` re-executions
    ///
    /// A task that keeps failing executes `max_retries + 1` times in total.
    pub fn new(queue: TaskQueue, max_retries: u32) -> Self {
        Self {
            queue,
            max_retries,
            attempts: Arc::new(Mutex::new(HashMap::new())),
            on_terminal_failure: None,
        }
    }

    /// Install a hook called exactly once per terminally failed task
    ///
    /// The orchestrator uses this to record the failed phase in the run
    /// summary; standalone queues can leave it unset.
    pub fn with_terminal_failure_hook(mut self, hook: TerminalFailureHook) -> Self {
        self.on_terminal_failure = Some(hook);
        self
    }

    /// Enqueue an operation with retry-on-failure semantics
    pub fn enqueue(&self, label: impl Into<String>, op: TaskOp) -> TaskId {
        let id = self.queue.next_id();
        let label = label.into();

        // Wrap the op so a success after earlier failures clears the counter
        // and leaves a terminal success entry in the log.
        let attempts = self.attempts.clone();
        let success_label = label.clone();
        let wrapped: TaskOp = Arc::new(move || {
            let fut = op();
            let attempts = attempts.clone();
            let label = success_label.clone();
            Box::pin(async move {
                let result = fut.await;
                if result.is_ok() {
                    let prior = lock_attempts(&attempts).remove(&id);
                    if let Some(failures) = prior {
                        info!(
                            task_id = id.0,
                            label = %label,
                            attempts = failures + 1,
                            "task succeeded after retry"
                        );
                    }
                }
                result
            })
        });

        self.queue
            .enqueue_task(Task::new(id, label, wrapped, Some(self.failure_hook())));
        id
    }

    /// Number of tasks not yet finished (pending plus in-flight)
    pub fn unfinished(&self) -> usize {
        self.queue.unfinished()
    }

    /// Block until every enqueued task (including pending retries) finished
    pub async fn wait_for_completion(&self) {
        self.queue.wait_for_completion().await
    }

    fn failure_hook(&self) -> FailureHook {
        let attempts = self.attempts.clone();
        let queue = self.queue.clone();
        let max_retries = self.max_retries;
        let on_terminal = self.on_terminal_failure.clone();

        Arc::new(move |err, task| {
            let attempts = attempts.clone();
            let queue = queue.clone();
            let on_terminal = on_terminal.clone();
            Box::pin(async move {
                let failures = {
                    let mut map = lock_attempts(&attempts);
                    let counter = map.entry(task.id()).or_insert(0);
                    *counter += 1;
                    *counter
                };

                if failures <= max_retries {
                    warn!(
                        task_id = task.id().0,
                        label = %task.label(),
                        attempt = failures,
                        max_retries,
                        error = %err,
                        "task failed, re-enqueueing"
                    );
                    // Back of the queue: other pending work runs first.
                    queue.enqueue_task(task);
                } else {
                    lock_attempts(&attempts).remove(&task.id());
                    error!(
                        task_id = task.id().0,
                        label = %task.label(),
                        attempts = failures,
                        error = %err,
                        "task dropped after exhausting retries"
                    );
                    if let Some(hook) = &on_terminal {
                        hook(task.id(), task.label(), &err);
                    }
                }
            })
        })
    }
}

impl std::fmt::Debug for RetryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryQueue")
            .field("max_retries", &self.max_retries)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

fn lock_attempts(attempts: &RetryState) -> std::sync::MutexGuard<'_, HashMap<TaskId, u32>> {
    match attempts.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn retry_queue(max_retries: u32) -> RetryQueue {
        RetryQueue::new(TaskQueue::new(Duration::from_millis(200), None), max_retries)
    }

    /// Op that fails the first `failures` times it runs, then succeeds
    fn flaky_op(counter: Arc<AtomicU32>, failures: u32) -> TaskOp {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt <= failures {
                    Err(Error::Other(format!("attempt {attempt} failed")))
                } else {
                    Ok(())
                }
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_attempt_k_with_k_executions() {
        let queue = retry_queue(3);
        let counter = Arc::new(AtomicU32::new(0));

        queue.enqueue("flaky", flaky_op(counter.clone(), 2));
        queue.wait_for_completion().await;

        assert_eq!(counter.load(Ordering::SeqCst), 3, "fails twice, succeeds on attempt 3");
        assert!(queue.attempts.lock().unwrap().is_empty(), "retry state cleared on success");
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_task_executes_max_retries_plus_one_times() {
        let queue = retry_queue(2);
        let counter = Arc::new(AtomicU32::new(0));
        let terminal = Arc::new(AtomicU32::new(0));

        let terminal_hook = terminal.clone();
        let queue = queue.with_terminal_failure_hook(Arc::new(move |_, _, _| {
            terminal_hook.fetch_add(1, Ordering::SeqCst);
        }));

        queue.enqueue("doomed", flaky_op(counter.clone(), u32::MAX));
        queue.wait_for_completion().await;

        assert_eq!(counter.load(Ordering::SeqCst), 3, "1 initial + 2 retries");
        assert_eq!(terminal.load(Ordering::SeqCst), 1, "exactly one terminal entry");
        assert!(queue.attempts.lock().unwrap().is_empty());

        // No further executions afterwards
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retried_task_requeues_behind_other_pending_work() {
        let queue = retry_queue(2);
        let trace = Arc::new(Mutex::new(Vec::new()));

        let op = |name: &str, fail_always: bool| -> TaskOp {
            let trace = trace.clone();
            let name = name.to_string();
            Arc::new(move || {
                let trace = trace.clone();
                let name = name.clone();
                Box::pin(async move {
                    trace.lock().unwrap().push(name.clone());
                    if fail_always {
                        Err(Error::Other("always fails".to_string()))
                    } else {
                        Ok(())
                    }
                })
            })
        };

        queue.enqueue("A", op("A", false));
        queue.enqueue("B", op("B", true));
        queue.enqueue("C", op("C", false));
        queue.wait_for_completion().await;

        assert_eq!(
            *trace.lock().unwrap(),
            vec!["A", "B", "C", "B", "B"],
            "retries of B interleave behind C, never blocking it"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_tasks_with_identical_labels_do_not_share_attempts() {
        let queue = retry_queue(1);
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        // Same label, same closure shape; only the TaskId differs.
        queue.enqueue("same", flaky_op(first.clone(), u32::MAX));
        queue.enqueue("same", flaky_op(second.clone(), u32::MAX));
        queue.wait_for_completion().await;

        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_hook_not_called_for_recovered_task() {
        let queue = retry_queue(3);
        let terminal = Arc::new(AtomicU32::new(0));
        let terminal_hook = terminal.clone();
        let queue = queue.with_terminal_failure_hook(Arc::new(move |_, _, _| {
            terminal_hook.fetch_add(1, Ordering::SeqCst);
        }));

        let counter = Arc::new(AtomicU32::new(0));
        queue.enqueue("recovers", flaky_op(counter.clone(), 1));
        queue.wait_for_completion().await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(terminal.load(Ordering::SeqCst), 0);
    }
}
