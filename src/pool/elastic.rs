//! Pool with a shared queue and a worker set that resizes at runtime.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::config::ElasticConfig;
use crate::error::PoolError;
use crate::future::{promise_task, TaskFuture};
use crate::task::Task;
use crate::timer::TaskSpawner;
use crate::util::run_logged;

/// A pool whose workers share one queue so the worker set can grow and
/// shrink without relocating tasks.
///
/// Shrinking is cooperative: [`del_threads`](ElasticPool::del_threads) posts
/// shrink tokens, and each worker that claims one retires itself into the
/// dead-worker queue, where [`join_dead_threads`](ElasticPool::join_dead_threads)
/// reaps its handle. An external controller can sample throughput through
/// [`reset_tasks_loaded`](ElasticPool::reset_tasks_loaded).
pub struct ElasticPool {
    inner: Arc<ElasticInner>,
}

struct ElasticInner {
    stop: AtomicBool,
    total_tasks: AtomicUsize,
    expect_threads: AtomicUsize,
    running_threads: AtomicUsize,
    shrink_tokens: AtomicUsize,
    tasks_loaded: AtomicUsize,
    waiting_for_task: AtomicBool,
    waiting_for_thread: AtomicBool,
    state: Mutex<ElasticState>,
    awake_cv: Condvar,
    task_done_cv: Condvar,
    thread_cv: Condvar,
}

struct ElasticState {
    queue: VecDeque<Task>,
    live: HashMap<ThreadId, JoinHandle<()>>,
    dead: Vec<JoinHandle<()>>,
}

impl ElasticPool {
    /// Create a pool with `initial_threads` workers.
    #[must_use]
    pub fn new(initial_threads: usize) -> Self {
        let pool = Self {
            inner: Arc::new(ElasticInner {
                stop: AtomicBool::new(false),
                total_tasks: AtomicUsize::new(0),
                expect_threads: AtomicUsize::new(0),
                running_threads: AtomicUsize::new(0),
                shrink_tokens: AtomicUsize::new(0),
                tasks_loaded: AtomicUsize::new(0),
                waiting_for_task: AtomicBool::new(false),
                waiting_for_thread: AtomicBool::new(false),
                state: Mutex::new(ElasticState {
                    queue: VecDeque::new(),
                    live: HashMap::new(),
                    dead: Vec::new(),
                }),
                awake_cv: Condvar::new(),
                task_done_cv: Condvar::new(),
                thread_cv: Condvar::new(),
            }),
        };
        pool.add_threads(initial_threads);
        pool
    }

    /// Build from an [`ElasticConfig`].
    pub fn with_config(config: &ElasticConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        Ok(Self::new(config.initial_workers))
    }

    /// Spawn `n` additional workers.
    pub fn add_threads(&self, n: usize) {
        self.inner.expect_threads.fetch_add(n, Ordering::SeqCst);
        let mut state = self.inner.state.lock();
        for _ in 0..n {
            let inner = Arc::clone(&self.inner);
            let handle = thread::Builder::new()
                .name("elastic-worker".into())
                .spawn(move || worker_loop(&inner))
                .expect("failed to spawn elastic worker");
            state.live.insert(handle.thread().id(), handle);
        }
    }

    /// Post `n` shrink tokens; the next `n` workers to observe one exit
    /// into the dead-worker queue. Non-blocking.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the expected worker count.
    pub fn del_threads(&self, n: usize) {
        let expected = self.inner.expect_threads.load(Ordering::SeqCst);
        assert!(
            n <= expected,
            "cannot remove {n} workers, only {expected} expected"
        );
        self.inner.expect_threads.fetch_sub(n, Ordering::SeqCst);
        self.inner.shrink_tokens.fetch_add(n, Ordering::SeqCst);
        let _state = self.inner.state.lock();
        self.inner.awake_cv.notify_all();
    }

    /// Grow or shrink to exactly `target` expected workers.
    pub fn adjust_threads(&self, target: usize) {
        let expected = self.inner.expect_threads.load(Ordering::SeqCst);
        if target > expected {
            self.add_threads(target - expected);
        } else if target < expected {
            self.del_threads(expected - target);
        }
    }

    /// Block until the running worker count matches the expected count.
    pub fn wait_threads(&self) {
        self.inner.waiting_for_thread.store(true, Ordering::Release);
        let mut state = self.inner.state.lock();
        while self.inner.expect_threads.load(Ordering::SeqCst)
            != self.inner.running_threads.load(Ordering::SeqCst)
        {
            self.inner.thread_cv.wait(&mut state);
        }
        self.inner
            .waiting_for_thread
            .store(false, Ordering::Release);
    }

    /// Block until the pool holds no queued or executing tasks.
    pub fn wait_tasks(&self) {
        self.inner.waiting_for_task.store(true, Ordering::Release);
        let mut state = self.inner.state.lock();
        while self.inner.total_tasks.load(Ordering::SeqCst) != 0 {
            self.inner.task_done_cv.wait(&mut state);
        }
        self.inner.waiting_for_task.store(false, Ordering::Release);
    }

    /// Join every retired worker, emptying the dead-worker queue.
    pub fn join_dead_threads(&self) {
        loop {
            let handle = self.inner.state.lock().dead.pop();
            match handle {
                Some(handle) => {
                    if handle.join().is_err() {
                        tracing::warn!("elastic worker exited by panic");
                    }
                }
                None => break,
            }
        }
    }

    /// Append one callable to the shared queue and wake a worker.
    pub fn submit<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(Task::new(f))
    }

    /// Submit and observe the result through a future.
    pub fn submit_for_return<R, F>(&self, f: F) -> Result<TaskFuture<R>, PoolError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (task, future) = promise_task(f);
        self.submit_task(task)?;
        Ok(future)
    }

    /// Append a batch under one critical section and wake every worker.
    pub fn submit_batch(&self, tasks: Vec<Task>) -> Result<(), PoolError> {
        if self.inner.stop.load(Ordering::Acquire) {
            return Err(PoolError::Shutdown);
        }
        {
            let mut state = self.inner.state.lock();
            self.inner
                .total_tasks
                .fetch_add(tasks.len(), Ordering::SeqCst);
            state.queue.extend(tasks);
        }
        self.inner.awake_cv.notify_all();
        Ok(())
    }

    pub(crate) fn submit_task(&self, task: Task) -> Result<(), PoolError> {
        if self.inner.stop.load(Ordering::Acquire) {
            return Err(PoolError::Shutdown);
        }
        {
            let mut state = self.inner.state.lock();
            self.inner.total_tasks.fetch_add(1, Ordering::SeqCst);
            state.queue.push_back(task);
        }
        self.inner.awake_cv.notify_one();
        Ok(())
    }

    /// Tasks queued or executing right now.
    pub fn tasks_remain(&self) -> usize {
        self.inner.total_tasks.load(Ordering::SeqCst)
    }

    /// Tasks dequeued by workers since the last reset.
    pub fn tasks_loaded(&self) -> usize {
        self.inner.tasks_loaded.load(Ordering::SeqCst)
    }

    /// Atomically fetch and zero the loaded-task counter. Controllers call
    /// this once per sampling interval to read throughput.
    pub fn reset_tasks_loaded(&self) -> usize {
        self.inner.tasks_loaded.swap(0, Ordering::SeqCst)
    }

    /// Workers the pool is converging toward.
    pub fn expect_thread_count(&self) -> usize {
        self.inner.expect_threads.load(Ordering::SeqCst)
    }

    /// Workers currently inside the loop.
    pub fn running_thread_count(&self) -> usize {
        self.inner.running_threads.load(Ordering::SeqCst)
    }

    /// Retire every worker and reap the handles. Queued tasks that no
    /// worker reached are dropped; call [`wait_tasks`](Self::wait_tasks)
    /// first to drain. Idempotent.
    pub fn close(&self) {
        if self.inner.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        self.adjust_threads(0);
        self.wait_threads();
        self.join_dead_threads();
    }
}

impl Drop for ElasticPool {
    fn drop(&mut self) {
        self.close();
    }
}

impl TaskSpawner for ElasticPool {
    fn spawn_task(&self, task: Task) {
        if let Err(err) = self.submit_task(task) {
            tracing::warn!(error = %err, "elastic executor rejected task");
        }
    }
}

fn worker_loop(inner: &Arc<ElasticInner>) {
    inner.running_threads.fetch_add(1, Ordering::SeqCst);
    if inner.waiting_for_thread.load(Ordering::Acquire) {
        let _state = inner.state.lock();
        inner.thread_cv.notify_one();
    }

    loop {
        let mut state = inner.state.lock();
        inner.awake_cv.wait_while(&mut state, |state| {
            state.queue.is_empty() && inner.shrink_tokens.load(Ordering::SeqCst) == 0
        });

        // a shrink token outranks queued work; close drops the backlog
        if inner.shrink_tokens.load(Ordering::SeqCst) > 0 {
            inner.shrink_tokens.fetch_sub(1, Ordering::SeqCst);
            let id = thread::current().id();
            if let Some(handle) = state.live.remove(&id) {
                state.dead.push(handle);
            }
            break;
        }

        let task = match state.queue.pop_front() {
            Some(task) => task,
            None => continue,
        };
        drop(state);

        inner.tasks_loaded.fetch_add(1, Ordering::SeqCst);
        run_logged(task);
        inner.total_tasks.fetch_sub(1, Ordering::SeqCst);

        if inner.waiting_for_task.load(Ordering::Acquire) {
            let _state = inner.state.lock();
            inner.task_done_cv.notify_one();
        }
    }

    inner.running_threads.fetch_sub(1, Ordering::SeqCst);
    if inner.waiting_for_thread.load(Ordering::Acquire) {
        let _state = inner.state.lock();
        inner.thread_cv.notify_one();
    }
}
