//! Fixed pool with per-worker double queues and bulk buffer swaps.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::fixed::FixedCore;
use super::slot::{DequeSlot, Slot};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::future::{promise_task, TaskFuture};
use crate::task::Task;
use crate::timer::TaskSpawner;
use crate::util::{next_index, run_logged};

/// A fixed-size pool whose slots pair a public queue with a worker-private
/// buffer. Producers and thieves contend only on the public side; the owning
/// worker swaps the whole queue out in one exchange and drains it without
/// further locking.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use taskmill::SteadyPool;
///
/// let pool = SteadyPool::new(4, 0);
/// let hits = Arc::new(AtomicUsize::new(0));
/// for _ in 0..64 {
///     let hits = Arc::clone(&hits);
///     pool.submit(move || {
///         hits.fetch_add(1, Ordering::Relaxed);
///     })
///     .unwrap();
/// }
/// pool.wait_all_idle();
/// assert_eq!(hits.load(Ordering::Relaxed), 64);
/// ```
pub struct SteadyPool {
    core: Arc<FixedCore<DequeSlot>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SteadyPool {
    /// Create a pool with `threads` workers (`0` = hardware concurrency)
    /// and a total task `capacity` (`0` = unbounded). A positive capacity is
    /// split evenly across workers, floor one task per slot.
    #[must_use]
    pub fn new(threads: usize, capacity: usize) -> Self {
        let core = FixedCore::new(threads, capacity);
        let workers = (0..core.thread_count())
            .map(|index| {
                let core = Arc::clone(&core);
                thread::Builder::new()
                    .name(format!("steady-worker-{index}"))
                    .spawn(move || worker_loop(&core, index))
                    .expect("failed to spawn steady worker")
            })
            .collect();
        Self {
            core,
            workers: Mutex::new(workers),
        }
    }

    /// Build from a validated [`PoolConfig`].
    pub fn with_config(config: &PoolConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        let pool = Self::new(config.worker_count, config.capacity);
        if config.steal_enabled {
            pool.enable_stealing(config.max_victims)?;
        }
        Ok(pool)
    }

    /// Route one callable to the least busy slot.
    pub fn submit<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.submit_task(Task::new(f))
    }

    /// Submit and observe the result through a future. A panic inside the
    /// callable resurfaces at [`TaskFuture::get`].
    pub fn submit_for_return<R, F>(&self, f: F) -> Result<TaskFuture<R>, PoolError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (task, future) = promise_task(f);
        self.core.submit_task(task)?;
        Ok(future)
    }

    /// Submit a batch, consuming the sequence. On overflow mid-batch the
    /// unplaced suffix lands in the overflow buffer and the refuse callback
    /// fires once.
    pub fn submit_batch(&self, tasks: Vec<Task>) -> Result<(), PoolError> {
        self.core.submit_batch(tasks)
    }

    /// Allow idle workers to steal from up to `max_victims` neighbors
    /// (`0` = derive from the worker count). The count must stay below the
    /// worker count.
    pub fn enable_stealing(&self, max_victims: usize) -> Result<(), PoolError> {
        self.core.enable_stealing(max_victims)
    }

    /// Stop work stealing; queued tasks stay with their slots.
    pub fn disable_stealing(&self) {
        self.core.disable_stealing();
    }

    /// Install the overflow notification hook. Fails on unbounded pools.
    pub fn set_refuse_callback<F>(&self, cb: F) -> Result<(), PoolError>
    where
        F: FnMut() + Send + 'static,
    {
        self.core.set_refuse_callback(Box::new(cb))
    }

    /// Take ownership of the most recent overflow batch.
    pub fn pull_overflow(&self) -> Vec<Task> {
        self.core.pull_overflow()
    }

    /// Block until every slot reports zero pending tasks.
    pub fn wait_all_idle(&self) {
        self.core.wait_all_idle();
    }

    /// Tasks queued or executing right now.
    pub fn tasks_remain(&self) -> usize {
        self.core.tasks_remain()
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.core.thread_count()
    }

    /// Stop the workers and join them. Queued tasks that no worker reached
    /// are dropped; call [`wait_all_idle`](Self::wait_all_idle) first to
    /// drain. Idempotent.
    pub fn close(&self) {
        if self.core.request_stop() {
            for handle in self.workers.lock().drain(..) {
                if handle.join().is_err() {
                    tracing::warn!("steady worker exited by panic");
                }
            }
        }
    }
}

impl Drop for SteadyPool {
    fn drop(&mut self) {
        self.close();
    }
}

impl TaskSpawner for SteadyPool {
    fn spawn_task(&self, task: Task) {
        if let Err(err) = self.core.submit_task(task) {
            tracing::warn!(error = %err, "steady executor rejected task");
        }
    }
}

fn worker_loop(core: &FixedCore<DequeSlot>, index: usize) {
    let mut buffer: VecDeque<Task> = VecDeque::new();
    let slots = core.slots();
    let me = &slots[index];

    while !core.stopped() {
        if me.pending() == 0 {
            if me.is_waiting() {
                me.notify_done();
                thread::yield_now();
                continue;
            }
            if core.steal_enabled() {
                let mut victim = index;
                let mut stolen = false;
                for _ in 0..core.max_steal() {
                    victim = next_index(victim, slots.len());
                    if slots[victim].try_give(me, &mut buffer) {
                        stolen = true;
                        break;
                    }
                }
                if stolen {
                    drain_buffer(me, &mut buffer);
                    continue;
                }
                if me.pending() != 0 || me.is_waiting() {
                    continue;
                }
            }
            thread::yield_now();
        } else {
            me.swap_into(&mut buffer);
            drain_buffer(me, &mut buffer);
        }
    }
}

fn drain_buffer(slot: &DequeSlot, buffer: &mut VecDeque<Task>) {
    while let Some(task) = buffer.pop_front() {
        run_logged(task);
        slot.finish_one();
    }
}
