//! Fixed pool with a single locked queue per worker.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::fixed::FixedCore;
use super::slot::{MonoSlot, Slot};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::future::{promise_task, TaskFuture};
use crate::task::Task;
use crate::timer::TaskSpawner;
use crate::util::{next_index, run_logged};

/// A fixed-size pool whose slots hold one queue behind one lock; workers pop
/// and thieves transfer a single task per acquisition. Routing, capacity,
/// stealing and batching match [`SteadyPool`](super::SteadyPool); only the
/// slot discipline differs.
pub struct BalancedPool {
    core: Arc<FixedCore<MonoSlot>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BalancedPool {
    /// Create a pool with `threads` workers (`0` = hardware concurrency)
    /// and a total task `capacity` (`0` = unbounded).
    #[must_use]
    pub fn new(threads: usize, capacity: usize) -> Self {
        let core = FixedCore::new(threads, capacity);
        let workers = (0..core.thread_count())
            .map(|index| {
                let core = Arc::clone(&core);
                thread::Builder::new()
                    .name(format!("balanced-worker-{index}"))
                    .spawn(move || worker_loop(&core, index))
                    .expect("failed to spawn balanced worker")
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

    /// Submit and observe the result through a future.
    pub fn submit_for_return<R, F>(&self, f: F) -> Result<TaskFuture<R>, PoolError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (task, future) = promise_task(f);
        self.core.submit_task(task)?;
        Ok(future)
    }

    /// Submit a batch, consuming the sequence.
    pub fn submit_batch(&self, tasks: Vec<Task>) -> Result<(), PoolError> {
        self.core.submit_batch(tasks)
    }

    /// Allow idle workers to steal single tasks from up to `max_victims`
    /// neighbors (`0` = derive from the worker count).
    pub fn enable_stealing(&self, max_victims: usize) -> Result<(), PoolError> {
        self.core.enable_stealing(max_victims)
    }

    /// Stop work stealing.
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

    /// Stop the workers and join them. Idempotent.
    pub fn close(&self) {
        if self.core.request_stop() {
            for handle in self.workers.lock().drain(..) {
                if handle.join().is_err() {
                    tracing::warn!("balanced worker exited by panic");
                }
            }
        }
    }
}

impl Drop for BalancedPool {
    fn drop(&mut self) {
        self.close();
    }
}

impl TaskSpawner for BalancedPool {
    fn spawn_task(&self, task: Task) {
        if let Err(err) = self.core.submit_task(task) {
            tracing::warn!(error = %err, "balanced executor rejected task");
        }
    }
}

fn worker_loop(core: &FixedCore<MonoSlot>, index: usize) {
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
                let mut stolen = None;
                for _ in 0..core.max_steal() {
                    victim = next_index(victim, slots.len());
                    if let Some(task) = slots[victim].try_give_one(me) {
                        stolen = Some(task);
                        break;
                    }
                }
                if let Some(task) = stolen {
                    run_logged(task);
                    me.finish_one();
                    continue;
                }
                if me.pending() != 0 || me.is_waiting() {
                    continue;
                }
            }
            thread::yield_now();
        } else if let Some(task) = me.try_load() {
            run_logged(task);
            me.finish_one();
        }
    }
}
