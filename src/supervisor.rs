//! Periodic resize controller for work branches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::branch::{BranchInner, WorkBranch};
use crate::config::SupervisorConfig;
use crate::error::PoolError;

type TickCallback = Box<dyn FnMut() + Send>;

/// Watches registered branches and resizes them once per interval:
/// additive increase bounded by the live backlog, one-worker decrease when
/// the queue is empty. Expansion never exceeds `max` workers and shrinking
/// stops at `min`.
///
/// Each supervised branch gets its own monitor thread. The supervisor holds
/// only weak references; dropping a branch unregisters it at the next tick.
pub struct Supervisor {
    shared: Arc<SupervisorShared>,
    monitors: Mutex<Vec<JoinHandle<()>>>,
}

struct SupervisorShared {
    stop: AtomicBool,
    min_workers: usize,
    max_workers: usize,
    interval: Duration,
    nap: Mutex<Duration>,
    nap_cv: Condvar,
    tick_cb: Mutex<Option<TickCallback>>,
    log_enabled: AtomicBool,
}

impl Supervisor {
    /// Create a supervisor bounding its branches to `[min, max]` workers,
    /// checking every `interval`.
    pub fn new(min: usize, max: usize, interval: Duration) -> Result<Self, PoolError> {
        if max <= min {
            return Err(PoolError::InvalidConfig(format!(
                "supervisor bounds must satisfy min < max, got [{min}, {max}]"
            )));
        }
        if interval.is_zero() {
            return Err(PoolError::InvalidConfig(
                "supervisor interval must be positive".into(),
            ));
        }
        Ok(Self {
            shared: Arc::new(SupervisorShared {
                stop: AtomicBool::new(false),
                min_workers: min,
                max_workers: max,
                interval,
                nap: Mutex::new(interval),
                nap_cv: Condvar::new(),
                tick_cb: Mutex::new(None),
                log_enabled: AtomicBool::new(false),
            }),
            monitors: Mutex::new(Vec::new()),
        })
    }

    /// Build from a validated [`SupervisorConfig`].
    pub fn with_config(config: &SupervisorConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        Self::new(config.min_workers, config.max_workers, config.interval())
    }

    /// Start monitoring a branch.
    pub fn supervise(&self, branch: &WorkBranch) {
        let shared = Arc::clone(&self.shared);
        let target = Arc::downgrade(branch.inner());
        let handle = thread::Builder::new()
            .name("supervisor".into())
            .spawn(move || monitor_loop(&shared, &target))
            .expect("failed to spawn supervisor thread");
        self.monitors.lock().push(handle);
    }

    /// Pause the tick loop: monitors sleep `timeout` between checks until
    /// [`resume`](Self::resume) restores the configured interval.
    pub fn suspend(&self, timeout: Duration) {
        *self.shared.nap.lock() = timeout;
    }

    /// Restore the configured interval and wake the monitors.
    pub fn resume(&self) {
        *self.shared.nap.lock() = self.shared.interval;
        self.shared.nap_cv.notify_all();
    }

    /// Run `cb` at the end of every tick, before the nap.
    pub fn set_tick_callback<F>(&self, cb: F)
    where
        F: FnMut() + Send + 'static,
    {
        *self.shared.tick_cb.lock() = Some(Box::new(cb));
    }

    /// Emit a `tracing` record per tick with worker and backlog levels.
    pub fn enable_log(&self) {
        self.shared.log_enabled.store(true, Ordering::Release);
    }

    /// Stop per-tick records.
    pub fn disable_log(&self) {
        self.shared.log_enabled.store(false, Ordering::Release);
    }

    /// Stop all monitor threads and join them. Idempotent.
    pub fn close(&self) {
        if self.shared.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let _nap = self.shared.nap.lock();
            self.shared.nap_cv.notify_all();
        }
        for handle in self.monitors.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.close();
    }
}

fn monitor_loop(shared: &Arc<SupervisorShared>, target: &Weak<BranchInner>) {
    while !shared.stop.load(Ordering::Acquire) {
        let Some(branch) = target.upgrade() else {
            tracing::debug!("supervised branch dropped; monitor exiting");
            return;
        };

        let backlog = branch.task_count();
        let workers = branch.worker_count();
        if backlog > 0 {
            let room = shared.max_workers.saturating_sub(workers);
            let wanted = backlog.saturating_sub(workers);
            for _ in 0..room.min(wanted) {
                branch.add_worker();
            }
        } else if workers > shared.min_workers {
            if let Err(err) = branch.del_worker() {
                tracing::warn!(error = %err, "failed to shrink supervised branch");
            }
        }
        drop(branch);

        if let Some(cb) = shared.tick_cb.lock().as_mut() {
            cb();
        }
        if shared.log_enabled.load(Ordering::Acquire) {
            let level = if workers >= shared.max_workers {
                "max"
            } else if workers <= shared.min_workers {
                "min"
            } else {
                "mid"
            };
            tracing::debug!(workers, backlog, level, "supervisor tick");
        }

        let mut nap = shared.nap.lock();
        if !shared.stop.load(Ordering::Acquire) {
            let timeout = *nap;
            shared.nap_cv.wait_for(&mut nap, timeout);
        }
    }
}
