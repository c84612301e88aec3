//! Supervised single-queue worker group.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::config::BranchConfig;
use crate::error::PoolError;
use crate::future::{promise_task, TaskFuture};
use crate::queue::TaskQueue;
use crate::task::Task;
use crate::timer::TaskSpawner;
use crate::util::run_logged;

const MAX_SPIN: u32 = 10_000;
const BALANCED_NAP: Duration = Duration::from_micros(500);

/// How an idle branch worker passes the time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Busy-wait with `yield_now`; minimal pickup latency.
    LowLatency,
    /// Yield up to `MAX_SPIN` times, then nap ~500 µs between polls.
    Balanced,
    /// Park on a condition variable until work arrives.
    Blocking,
}

/// A worker group over one shared deque, sized at runtime by
/// [`add_worker`](WorkBranch::add_worker) / [`del_worker`](WorkBranch::del_worker)
/// — typically driven by a [`Supervisor`](crate::supervisor::Supervisor).
///
/// Submission comes in three modes: `submit` appends, `submit_urgent`
/// prepends (no priority over tasks already dequeued), and
/// `submit_sequence` runs a list of callables back to back on one worker.
pub struct WorkBranch {
    inner: Arc<BranchInner>,
}

pub(crate) struct BranchInner {
    strategy: WaitStrategy,
    decline: AtomicUsize,
    is_waiting: AtomicBool,
    destructing: AtomicBool,
    queue: TaskQueue<Task>,
    sync: Mutex<BranchSync>,
    thread_cv: Condvar,
    task_done_cv: Condvar,
    task_cv: Condvar,
}

struct BranchSync {
    workers: HashMap<ThreadId, JoinHandle<()>>,
    task_done_workers: usize,
}

impl WorkBranch {
    /// Create a branch with `workers` threads (floor one) and the given
    /// idle strategy.
    #[must_use]
    pub fn new(workers: usize, strategy: WaitStrategy) -> Self {
        let inner = Arc::new(BranchInner {
            strategy,
            decline: AtomicUsize::new(0),
            is_waiting: AtomicBool::new(false),
            destructing: AtomicBool::new(false),
            queue: TaskQueue::new(),
            sync: Mutex::new(BranchSync {
                workers: HashMap::new(),
                task_done_workers: 0,
            }),
            thread_cv: Condvar::new(),
            task_done_cv: Condvar::new(),
            task_cv: Condvar::new(),
        });
        for _ in 0..workers.max(1) {
            inner.add_worker();
        }
        Self { inner }
    }

    /// Build from a [`BranchConfig`].
    #[must_use]
    pub fn with_config(config: &BranchConfig) -> Self {
        Self::new(config.initial_workers, config.wait_strategy)
    }

    /// Append a callable to the queue.
    pub fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.push_back(Task::new(f));
    }

    /// Insert a callable ahead of queued tasks. Tasks already dequeued are
    /// unaffected.
    pub fn submit_urgent<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.push_front(Task::new(f));
    }

    /// Append one composite task that runs the given tasks in order on a
    /// single worker, without interleaving.
    pub fn submit_sequence(&self, tasks: Vec<Task>) {
        self.inner.push_back(Task::new(move || {
            for task in tasks {
                task.run();
            }
        }));
    }

    /// Append a callable and observe its result through a future.
    pub fn submit_with_return<R, F>(&self, f: F) -> TaskFuture<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (task, future) = promise_task(f);
        self.inner.push_back(task);
        future
    }

    /// Prepend a callable and observe its result through a future.
    pub fn submit_urgent_with_return<R, F>(&self, f: F) -> TaskFuture<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (task, future) = promise_task(f);
        self.inner.push_front(task);
        future
    }

    /// Spawn one more worker.
    pub fn add_worker(&self) {
        self.inner.add_worker();
    }

    /// Request one worker exit. Cooperative: the thread leaves when it next
    /// observes the request.
    pub fn del_worker(&self) -> Result<(), PoolError> {
        self.inner.del_worker()
    }

    /// Number of live workers.
    pub fn worker_count(&self) -> usize {
        self.inner.worker_count()
    }

    /// Number of queued (not yet dequeued) tasks.
    pub fn task_count(&self) -> usize {
        self.inner.task_count()
    }

    /// Wait until every worker reports idle, pausing them at the rendezvous
    /// until this call returns. `None` waits indefinitely and reports
    /// `true`; a timeout reports whether the drain completed in time.
    pub fn wait_tasks(&self, timeout: Option<Duration>) -> bool {
        self.inner.wait_tasks(timeout)
    }

    /// Retire every worker and wait for them to leave. Queued tasks that no
    /// worker reached are dropped. Idempotent.
    pub fn close(&self) {
        self.inner.shutdown();
    }

    pub(crate) fn inner(&self) -> &Arc<BranchInner> {
        &self.inner
    }
}

impl Drop for WorkBranch {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl TaskSpawner for WorkBranch {
    fn spawn_task(&self, task: Task) {
        self.inner.push_back(task);
    }
}

impl BranchInner {
    pub(crate) fn add_worker(self: &Arc<Self>) {
        let mut sync = self.sync.lock();
        if self.destructing.load(Ordering::Acquire) {
            return;
        }
        let inner = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("branch-worker".into())
            .spawn(move || inner.worker_loop())
            .expect("failed to spawn branch worker");
        sync.workers.insert(handle.thread().id(), handle);
    }

    pub(crate) fn del_worker(&self) -> Result<(), PoolError> {
        let sync = self.sync.lock();
        if sync.workers.is_empty() {
            return Err(PoolError::NoWorker);
        }
        self.decline.fetch_add(1, Ordering::AcqRel);
        if self.strategy == WaitStrategy::Blocking {
            self.task_cv.notify_all();
        }
        Ok(())
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.sync.lock().workers.len()
    }

    pub(crate) fn task_count(&self) -> usize {
        self.queue.len()
    }

    fn push_back(&self, task: Task) {
        self.queue.push_back(task);
        if self.strategy == WaitStrategy::Blocking {
            self.task_cv.notify_one();
        }
    }

    fn push_front(&self, task: Task) {
        self.queue.push_front(task);
        if self.strategy == WaitStrategy::Blocking {
            self.task_cv.notify_one();
        }
    }

    fn wait_tasks(&self, timeout: Option<Duration>) -> bool {
        let drained;
        {
            let mut sync = self.sync.lock();
            self.is_waiting.store(true, Ordering::Release);
            if self.strategy == WaitStrategy::Blocking {
                self.task_cv.notify_all();
            }
            // ">=" tolerates workers deleted by a supervisor mid-wait
            match timeout {
                Some(timeout) => {
                    let result = self.task_done_cv.wait_while_for(
                        &mut sync,
                        |sync| sync.task_done_workers < sync.workers.len(),
                        timeout,
                    );
                    drained = !result.timed_out();
                }
                None => {
                    self.task_done_cv
                        .wait_while(&mut sync, |sync| {
                            sync.task_done_workers < sync.workers.len()
                        });
                    drained = true;
                }
            }
            sync.task_done_workers = 0;
            self.is_waiting.store(false, Ordering::Release);
        }
        self.thread_cv.notify_all();
        drained
    }

    fn shutdown(&self) {
        let mut sync = self.sync.lock();
        if self.destructing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.decline
            .store(sync.workers.len(), Ordering::SeqCst);
        if self.strategy == WaitStrategy::Blocking {
            self.task_cv.notify_all();
        }
        self.thread_cv
            .wait_while(&mut sync, |_| self.decline.load(Ordering::SeqCst) > 0);
    }

    fn worker_loop(self: Arc<Self>) {
        let mut spin: u32 = 0;
        loop {
            if self.decline.load(Ordering::Acquire) == 0 {
                if let Some(task) = self.queue.try_pop() {
                    run_logged(task);
                    spin = 0;
                    continue;
                }
            }

            if self.decline.load(Ordering::Acquire) > 0 {
                let mut sync = self.sync.lock();
                // double check under the lock; another worker may have
                // claimed the request first
                if self.decline.load(Ordering::Acquire) > 0 {
                    self.decline.fetch_sub(1, Ordering::AcqRel);
                    sync.workers.remove(&thread::current().id());
                    if self.is_waiting.load(Ordering::Acquire) {
                        self.task_done_cv.notify_one();
                    }
                    if self.destructing.load(Ordering::Acquire) {
                        self.thread_cv.notify_one();
                    }
                    return;
                }
                continue;
            }

            if self.is_waiting.load(Ordering::Acquire) {
                let mut sync = self.sync.lock();
                // is_waiting flips only under this lock; re-check so a stale
                // report cannot leak into the next wait round
                if self.is_waiting.load(Ordering::Acquire) {
                    sync.task_done_workers += 1;
                    self.task_done_cv.notify_one();
                    self.thread_cv
                        .wait_while(&mut sync, |_| self.is_waiting.load(Ordering::Acquire));
                }
                continue;
            }

            match self.strategy {
                WaitStrategy::LowLatency => thread::yield_now(),
                WaitStrategy::Balanced => {
                    if spin < MAX_SPIN {
                        spin += 1;
                        thread::yield_now();
                    } else {
                        thread::sleep(BALANCED_NAP);
                    }
                }
                WaitStrategy::Blocking => {
                    let mut sync = self.sync.lock();
                    self.task_cv.wait_while(&mut sync, |_| {
                        self.queue.is_empty()
                            && !self.is_waiting.load(Ordering::Acquire)
                            && !self.destructing.load(Ordering::Acquire)
                            && self.decline.load(Ordering::Acquire) == 0
                    });
                }
            }
        }
    }
}
