//! Fixed-size worker pool draining a lock-free task queue

use crate::queue::TaskQueue;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

/// How long an idle worker sleeps before re-checking the queue and the
/// shutdown flag.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Worker pool errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Worker pool is shut down")]
    Closed,

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Worker pool size must be > 0")]
    InvalidSize,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared result slot, written once by the executing worker.
struct TaskSlot<T> {
    result: Mutex<Option<Result<T, PoolError>>>,
    done: Condvar,
}

/// Handle for awaiting the result of a submitted task.
///
/// The result is produced exactly once; `wait` caches it, so repeated calls
/// return the same outcome.
pub struct TaskHandle<T> {
    slot: Arc<TaskSlot<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task has executed and return its result.
    pub fn wait(&self) -> Result<T, PoolError>
    where
        T: Clone,
    {
        let mut guard = self
            .slot
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            guard = self
                .slot
                .done
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Non-blocking probe: `None` while the task is still pending.
    pub fn try_result(&self) -> Option<Result<T, PoolError>>
    where
        T: Clone,
    {
        self.slot
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the task has finished (successfully or not).
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.slot
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

struct PoolShared {
    queue: TaskQueue<Job>,
    shutdown: AtomicBool,
    idle: Mutex<()>,
    wake: Condvar,
}

/// Fixed set of long-lived workers executing submitted tasks.
///
/// Workers race for the next task; there is no cross-worker FIFO guarantee.
/// A panicking task is caught and logged, and the worker survives to take
/// the next task.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool with `size` workers.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidSize` for `size == 0`, or
    /// `PoolError::Spawn` if a worker thread cannot be started.
    pub fn new(size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::InvalidSize);
        }

        let shared = Arc::new(PoolShared {
            queue: TaskQueue::new(),
            shutdown: AtomicBool::new(false),
            idle: Mutex::new(()),
            wake: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("pool-worker-{id}"))
                .spawn(move || worker_loop(id, &shared))
                .map_err(|e| PoolError::Spawn(e.to_string()))?;
            workers.push(handle);
        }

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Create a pool sized to the machine (one worker per logical CPU).
    pub fn with_default_size() -> Result<Self, PoolError> {
        Self::new(num_cpus::get().max(1))
    }

    /// Submit a task and receive a handle for awaiting its result.
    ///
    /// # Errors
    ///
    /// Fails with `PoolError::Closed` after `shutdown`; the task is not
    /// enqueued in that case.
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let slot = Arc::new(TaskSlot {
            result: Mutex::new(None),
            done: Condvar::new(),
        });
        let task_slot = Arc::clone(&slot);

        let job: Job = Box::new(move || {
            let outcome = match catch_unwind(AssertUnwindSafe(task)) {
                Ok(value) => Ok(value),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!("Pool task panicked: {message}");
                    Err(PoolError::Panicked(message))
                }
            };
            let mut result = task_slot
                .result
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *result = Some(outcome);
            task_slot.done.notify_all();
        });

        self.shared.queue.push(job);
        // Notify under the idle mutex so a worker between its empty check
        // and its wait cannot miss the wakeup.
        let _guard = self
            .shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.shared.wake.notify_one();

        Ok(TaskHandle { slot })
    }

    /// Approximate number of queued (not yet started) tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Number of worker threads.
    #[must_use]
    pub fn size(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Request shutdown and block until every worker has exited.
    ///
    /// Already-queued tasks are drained before the workers exit; tasks
    /// submitted after this call fail with `PoolError::Closed`. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let _guard = self
                .shared
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.shared.wake.notify_all();
        }

        let mut workers = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for handle in workers.drain(..) {
            let name = handle.thread().name().unwrap_or("pool-worker").to_string();
            if handle.join().is_err() {
                error!("Worker thread {name} panicked outside a task");
            }
        }
        debug!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, shared: &PoolShared) {
    debug!(worker = id, "Pool worker started");
    loop {
        if let Some(job) = shared.queue.pop() {
            job();
            continue;
        }

        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        let guard = shared.idle.lock().unwrap_or_else(PoisonError::into_inner);
        // Re-check under the lock: a submit between the failed pop and this
        // point already issued its notification.
        if !shared.queue.is_empty() || shared.shutdown.load(Ordering::Acquire) {
            continue;
        }
        let _ = shared
            .wake
            .wait_timeout(guard, IDLE_WAIT)
            .unwrap_or_else(PoisonError::into_inner);
    }
    debug!(worker = id, "Pool worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_zero_size_rejected() {
        assert_eq!(WorkerPool::new(0).unwrap_err(), PoolError::InvalidSize);
    }

    #[test]
    fn test_task_result_roundtrip() {
        let pool = WorkerPool::new(2).unwrap();
        let handle = pool.submit(|| 6 * 7).unwrap();
        assert_eq!(handle.wait(), Ok(42));
        // The result is cached: a second wait observes the same value.
        assert_eq!(handle.wait(), Ok(42));
        pool.shutdown();
    }

    #[test]
    fn test_hundred_tasks_four_workers() {
        let pool = WorkerPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.submit(move || counter.fetch_add(1, Ordering::SeqCst))
                    .unwrap()
            })
            .collect();

        for handle in handles {
            handle.wait().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        pool.shutdown();
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new(2).unwrap();
        pool.shutdown();

        let executed = Arc::new(AtomicUsize::new(0));
        let task_flag = Arc::clone(&executed);
        let result = pool.submit(move || {
            task_flag.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(result.unwrap_err(), PoolError::Closed);

        // The rejected task must never run.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_worker_survives_panicking_task() {
        let pool = WorkerPool::new(1).unwrap();

        let panicking = pool
            .submit(|| -> u32 { panic!("task blew up") })
            .unwrap();
        match panicking.wait() {
            Err(PoolError::Panicked(message)) => assert!(message.contains("task blew up")),
            other => panic!("expected Panicked, got {other:?}"),
        }

        // The single worker must still be alive to run this.
        let handle = pool.submit(|| "still alive").unwrap();
        assert_eq!(handle.wait(), Ok("still alive"));
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let pool = WorkerPool::new(2).unwrap();
        pool.shutdown();
        pool.shutdown();
    }

    #[test]
    fn test_pending_drains_to_zero() {
        let pool = WorkerPool::new(4).unwrap();
        let handles: Vec<_> = (0..20)
            .map(|i| pool.submit(move || i * 2).unwrap())
            .collect();
        for handle in handles {
            handle.wait().unwrap();
        }
        assert_eq!(pool.pending(), 0);
        pool.shutdown();
    }
}
