//! Fixed-size worker pool for blocking store work.
//!
//! Tasks run in submission order on `size` dedicated OS threads. Each task
//! reports back over a [`tokio::sync::oneshot`] channel, so async callers
//! await the result without ever blocking their executor. A caller that drops
//! its receiver before a worker reaches the task withdraws it: the task is
//! skipped, never half-run.

use amdb_core::{observe, AmdbError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{error, trace};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Pool metrics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub queue_depth: usize,
    pub active_tasks: usize,
    pub tasks_completed: u64,
    pub tasks_withdrawn: u64,
    pub worker_count: usize,
}

struct PoolInner {
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    idle: Condvar,
    shutdown: AtomicBool,
    active_tasks: AtomicUsize,
    tasks_completed: AtomicU64,
    tasks_withdrawn: AtomicU64,
}

pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers named `{name}-0`, `{name}-1`, ...
    pub fn new(name: &str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(AmdbError::Config("worker pool needs at least one thread".into()));
        }
        if size == 1 {
            tracing::warn!(
                "worker pool has a single thread; a unit of work that waits on another will deadlock"
            );
        }

        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active_tasks: AtomicUsize::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_withdrawn: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let inner_clone = Arc::clone(&inner);
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || worker_loop(&inner_clone));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Let the workers that did start exit again.
                    inner.shutdown.store(true, Ordering::Release);
                    {
                        let _queue = inner.queue.lock();
                        inner.work_ready.notify_all();
                    }
                    return Err(AmdbError::Io(e));
                }
            }
        }

        Ok(Self {
            inner,
            workers: Mutex::new(workers),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Queue `work` and return the receiving end of its result.
    ///
    /// Never blocks on the work itself. Fails with [`AmdbError::Closed`]
    /// after [`shutdown`](Self::shutdown).
    pub fn submit<T, F>(&self, work: F) -> Result<oneshot::Receiver<Result<T>>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(AmdbError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let task: Task = Box::new(move || {
            if tx.is_closed() {
                inner.tasks_withdrawn.fetch_add(1, Ordering::Relaxed);
                observe::record_withdrawn();
                trace!("task withdrawn before start");
                return;
            }
            let result = catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|panic| {
                let msg = panic_message(panic.as_ref());
                error!(panic = %msg, "unit of work panicked");
                Err(AmdbError::Internal(format!("unit of work panicked: {}", msg)))
            });
            // The caller may have stopped waiting; the result is discarded.
            let _ = tx.send(result);
        });

        let depth = {
            let mut queue = self.inner.queue.lock();
            // Re-check under the lock so nothing lands after shutdown drained.
            if self.is_shutdown() {
                return Err(AmdbError::Closed);
            }
            queue.push_back(task);
            queue.len()
        };
        observe::set_queue_depth(depth);
        self.inner.work_ready.notify_one();
        Ok(rx)
    }

    /// Stop accepting work and discard everything still queued.
    ///
    /// Discarded tasks drop their result senders, so their callers observe a
    /// closed channel. Tasks already running finish normally. Workers exit
    /// on their own; this never joins, so it is safe to call from a worker.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let discarded: Vec<Task> = {
            let mut queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
            queue.drain(..).collect()
        };
        if !discarded.is_empty() {
            trace!(count = discarded.len(), "discarding queued tasks");
        }
        drop(discarded);
        observe::set_queue_depth(0);
        let _queue = self.inner.queue.lock();
        self.inner.idle.notify_all();
    }

    /// Block until the queue is empty and no task is running.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while !queue.is_empty() || self.inner.active_tasks.load(Ordering::Acquire) > 0 {
            self.inner.idle.wait(&mut queue);
        }
    }

    /// Shut down and wait for every worker thread to exit.
    ///
    /// Must not be called from inside a task.
    pub fn join(&self) {
        self.shutdown();
        let current = std::thread::current().id();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue_depth: self.inner.queue.lock().len(),
            active_tasks: self.inner.active_tasks.load(Ordering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Relaxed),
            tasks_withdrawn: self.inner.tasks_withdrawn.load(Ordering::Relaxed),
            worker_count: self.size,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements `active_tasks` even if the task unwinds past `catch_unwind`.
struct ActiveTaskGuard<'a> {
    inner: &'a PoolInner,
}

impl Drop for ActiveTaskGuard<'_> {
    fn drop(&mut self) {
        let prev = self.inner.active_tasks.fetch_sub(1, Ordering::Release);
        self.inner.tasks_completed.fetch_add(1, Ordering::Relaxed);
        if prev == 1 {
            let _queue = self.inner.queue.lock();
            self.inner.idle.notify_all();
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    inner.active_tasks.fetch_add(1, Ordering::Release);
                    observe::set_queue_depth(queue.len());
                    break task;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };
        task();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_submit_returns_result() {
        let pool = WorkerPool::new("test-pool", 2).unwrap();
        let rx = pool.submit(|| Ok(21 * 2)).unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let pool = WorkerPool::new("test-pool", 2).unwrap();
        let rx = pool
            .submit(|| -> Result<()> { Err(AmdbError::NotFound("x".into())) })
            .unwrap();
        assert!(rx.await.unwrap().unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let pool = WorkerPool::new("test-pool", 2).unwrap();
        let rx = pool.submit(|| -> Result<()> { panic!("kaboom") }).unwrap();
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, AmdbError::Internal(ref m) if m.contains("kaboom")));

        // The worker survives.
        let rx = pool.submit(|| Ok(1)).unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), 1);
    }

    #[test]
    fn test_fifo_on_single_worker() {
        let pool = WorkerPool::new("test-pool", 1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut receivers = Vec::new();
        for i in 0..10 {
            let order = Arc::clone(&order);
            receivers.push(
                pool.submit(move || {
                    order.lock().push(i);
                    Ok(())
                })
                .unwrap(),
            );
        }
        pool.drain();
        assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_withdrawn_task_never_runs() {
        let pool = WorkerPool::new("test-pool", 1).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        // Park the only worker.
        let _blocker = pool
            .submit(move || {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                Ok(())
            })
            .unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let rx = pool
            .submit(move || {
                ran_clone.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        drop(rx);

        release_tx.send(()).unwrap();
        pool.drain();
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(pool.stats().tasks_withdrawn, 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_and_discards() {
        let pool = WorkerPool::new("test-pool", 1).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let running = pool
            .submit(move || {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                Ok("finished")
            })
            .unwrap();
        let queued = pool.submit(|| Ok("never")).unwrap();

        // Give the worker a chance to pick up the first task.
        while pool.stats().active_tasks == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        pool.shutdown();
        assert!(pool.submit(|| Ok(())).unwrap_err().is_closed());

        release_tx.send(()).unwrap();
        assert_eq!(running.await.unwrap().unwrap(), "finished");
        assert!(queued.await.is_err());
        pool.join();
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(WorkerPool::new("test-pool", 0).is_err());
    }
}
