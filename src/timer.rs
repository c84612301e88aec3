//! Deadline-ordered timer scheduling.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::config::TimerConfig;
use crate::task::Task;
use crate::util::panic_message;

/// Identifier handed out by [`TimerScheduler::submit`].
pub type TimerId = u64;

/// Re-arming policy for repeating timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    /// `next = previous + interval`: drift-free spacing; a late dispatcher
    /// fires back-to-back until it catches up.
    Steady,
    /// `next = now + interval`: rebases from the current time, skipping
    /// missed ticks.
    Dynamic,
}

/// Anything that can run a ready [`Task`]. Implemented by every pool and by
/// [`WorkBranch`](crate::branch::WorkBranch), so any of them can serve as a
/// scheduler's executor.
pub trait TaskSpawner: Send + Sync {
    /// Hand a ready task over for execution.
    fn spawn_task(&self, task: Task);
}

struct TimerEntry {
    id: TimerId,
    callback: Arc<dyn Fn() + Send + Sync>,
    delay: Duration,
    interval: Duration,
    trigger: Instant,
    cancelled: Arc<AtomicBool>,
}

impl TimerEntry {
    fn repeating(&self) -> bool {
        !self.interval.is_zero()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Heap ordering: earliest trigger first, submission id as tie-break.
struct OrderedTimer(TimerEntry);

impl PartialEq for OrderedTimer {
    fn eq(&self, other: &Self) -> bool {
        self.0.trigger == other.0.trigger && self.0.id == other.0.id
    }
}

impl Eq for OrderedTimer {}

impl PartialOrd for OrderedTimer {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedTimer {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0
            .trigger
            .cmp(&other.0.trigger)
            .then(self.0.id.cmp(&other.0.id))
    }
}

/// Schedules deferred callbacks and dispatches each at its trigger time,
/// either inline on the dispatcher thread or onto an executor pool.
///
/// Timers submitted before [`start`](TimerScheduler::start) arm when the
/// scheduler starts; later submissions arm immediately. `stop` then `start`
/// re-arms every retained timer from a fresh epoch.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
/// use taskmill::{Recurrence, TimerScheduler};
///
/// let scheduler = TimerScheduler::new(Recurrence::Steady);
/// let fired = Arc::new(AtomicUsize::new(0));
/// let observer = Arc::clone(&fired);
/// scheduler.submit(
///     move || {
///         observer.fetch_add(1, Ordering::Relaxed);
///     },
///     Duration::from_millis(5),
///     Duration::ZERO,
/// );
/// assert!(scheduler.start());
/// std::thread::sleep(Duration::from_millis(50));
/// assert!(scheduler.stop());
/// assert_eq!(fired.load(Ordering::Relaxed), 1);
/// ```
pub struct TimerScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    recurrence: Recurrence,
    executor: Option<Arc<dyn TaskSpawner>>,
    next_id: AtomicU64,
    state: Mutex<SchedulerState>,
    cv: Condvar,
}

struct SchedulerState {
    running: bool,
    heap: BinaryHeap<Reverse<OrderedTimer>>,
    pending: Vec<TimerEntry>,
    index: HashMap<TimerId, Arc<AtomicBool>>,
    current: Option<TimerId>,
    cancelling: bool,
    dispatcher: Option<JoinHandle<()>>,
}

impl TimerScheduler {
    /// A scheduler that invokes callbacks inline on its dispatcher thread.
    #[must_use]
    pub fn new(recurrence: Recurrence) -> Self {
        Self::build(recurrence, None)
    }

    /// A scheduler that hands matured callbacks to `executor`.
    #[must_use]
    pub fn with_executor(recurrence: Recurrence, executor: Arc<dyn TaskSpawner>) -> Self {
        Self::build(recurrence, Some(executor))
    }

    /// Build from a [`TimerConfig`], without an executor.
    #[must_use]
    pub fn with_config(config: &TimerConfig) -> Self {
        Self::new(config.recurrence)
    }

    fn build(recurrence: Recurrence, executor: Option<Arc<dyn TaskSpawner>>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                recurrence,
                executor,
                next_id: AtomicU64::new(0),
                state: Mutex::new(SchedulerState {
                    running: false,
                    heap: BinaryHeap::new(),
                    pending: Vec::new(),
                    index: HashMap::new(),
                    current: None,
                    cancelling: false,
                    dispatcher: None,
                }),
                cv: Condvar::new(),
            }),
        }
    }

    /// Register a timer: first fire after `delay`, then every `interval`.
    /// A zero interval makes it one-shot.
    pub fn submit<F>(&self, callback: F, delay: Duration, interval: Duration) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = TimerEntry {
            id,
            callback: Arc::new(callback),
            delay,
            interval,
            trigger: Instant::now() + delay,
            cancelled: Arc::clone(&cancelled),
        };

        let mut state = self.inner.state.lock();
        state.index.insert(id, cancelled);
        if state.running {
            state.heap.push(Reverse(OrderedTimer(entry)));
            // the new timer may now hold the earliest deadline
            self.inner.cv.notify_one();
        } else {
            state.pending.push(entry);
        }
        id
    }

    /// Spawn the dispatcher, arming every retained timer from now. Returns
    /// `false` if already running.
    pub fn start(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.running {
            return false;
        }
        state.running = true;

        let now = Instant::now();
        let mut retained: Vec<TimerEntry> = state.pending.drain(..).collect();
        retained.extend(state.heap.drain().map(|Reverse(OrderedTimer(e))| e));
        for mut entry in retained {
            entry.trigger = now + entry.delay;
            state.heap.push(Reverse(OrderedTimer(entry)));
        }

        let inner = Arc::clone(&self.inner);
        state.dispatcher = Some(
            thread::Builder::new()
                .name("timer-dispatch".into())
                .spawn(move || inner.dispatch())
                .expect("failed to spawn timer dispatcher"),
        );
        true
    }

    /// Stop the dispatcher and join it. Retained timers survive for a later
    /// [`start`](Self::start). Returns `false` if not running.
    pub fn stop(&self) -> bool {
        let handle = {
            let mut state = self.inner.state.lock();
            if !state.running {
                return false;
            }
            state.running = false;
            self.inner.cv.notify_all();
            state.dispatcher.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        true
    }

    /// Cancel a timer. Returns `false` for unknown or already-cancelled
    /// ids. With `wait` set and the timer's callback currently at the
    /// dispatch site, blocks until that call site clears.
    pub fn cancel(&self, id: TimerId, wait: bool) -> bool {
        let mut state = self.inner.state.lock();
        match state.index.remove(&id) {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                if wait && state.current == Some(id) {
                    state.cancelling = true;
                    self.inner.cv.wait_while(&mut state, |state| state.cancelling);
                }
                true
            }
            None => false,
        }
    }

    /// Number of live (non-cancelled) timers.
    pub fn timer_count(&self) -> usize {
        self.inner.state.lock().index.len()
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Wakeup {
    Empty,
    DropCancelled,
    NotYet(Instant),
    Due,
}

impl SchedulerInner {
    fn dispatch(self: Arc<Self>) {
        let mut state = self.state.lock();
        while state.running {
            let wakeup = match state.heap.peek() {
                None => Wakeup::Empty,
                Some(Reverse(OrderedTimer(entry))) if entry.is_cancelled() => {
                    Wakeup::DropCancelled
                }
                Some(Reverse(OrderedTimer(entry))) => {
                    if entry.trigger > Instant::now() {
                        Wakeup::NotYet(entry.trigger)
                    } else {
                        Wakeup::Due
                    }
                }
            };

            match wakeup {
                Wakeup::Empty => {
                    // woken by submit, cancel or stop
                    self.cv.wait(&mut state);
                }
                Wakeup::DropCancelled => {
                    if let Some(Reverse(OrderedTimer(entry))) = state.heap.pop() {
                        tracing::debug!(timer_id = entry.id, "discarding cancelled timer");
                    }
                }
                Wakeup::NotYet(trigger) => {
                    self.cv.wait_until(&mut state, trigger);
                }
                Wakeup::Due => {
                    let Some(Reverse(OrderedTimer(mut entry))) = state.heap.pop() else {
                        continue;
                    };
                    if entry.repeating() {
                        // next trigger computed before dispatch, so callback
                        // runtime never skews the schedule
                        entry.trigger = match self.recurrence {
                            Recurrence::Steady => entry.trigger + entry.interval,
                            Recurrence::Dynamic => Instant::now() + entry.interval,
                        };
                    }
                    state.current = Some(entry.id);
                    drop(state);
                    self.fire(&entry);
                    state = self.state.lock();
                    state.current = None;

                    if entry.is_cancelled() {
                        // a cancel(wait) may be parked on the call site
                        state.cancelling = false;
                        self.cv.notify_all();
                    }
                    if !entry.is_cancelled() && entry.repeating() {
                        state.heap.push(Reverse(OrderedTimer(entry)));
                    } else {
                        state.index.remove(&entry.id);
                    }
                }
            }
        }
    }

    fn fire(&self, entry: &TimerEntry) {
        let id = entry.id;
        match &self.executor {
            Some(executor) => {
                let callback = Arc::clone(&entry.callback);
                executor.spawn_task(Task::new(move || {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback())) {
                        tracing::error!(
                            timer_id = id,
                            panic = %panic_message(payload.as_ref()),
                            "timer callback panicked"
                        );
                    }
                }));
            }
            None => {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (entry.callback)())) {
                    tracing::error!(
                        timer_id = id,
                        panic = %panic_message(payload.as_ref()),
                        "timer callback panicked"
                    );
                }
            }
        }
    }
}
