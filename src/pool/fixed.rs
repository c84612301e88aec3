//! Shared mechanics of the fixed-size pools: cursor placement, capacity
//! admission, overflow handling and lifecycle.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::slot::Slot;
use crate::error::PoolError;
use crate::task::Task;
use crate::util::next_index;

/// Overflow notification hook; fires once per overflow event.
pub(crate) type RefuseCallback = Box<dyn FnMut() + Send>;

/// State shared between a fixed pool's handle and its workers.
pub(crate) struct FixedCore<S> {
    stop: AtomicBool,
    slots: Box<[S]>,
    cursor: AtomicUsize,
    cursor_move_limit: usize,
    per_slot_cap: usize,
    steal_enabled: AtomicBool,
    max_steal: AtomicUsize,
    overflow: Mutex<Vec<Task>>,
    refuse_cb: Mutex<Option<RefuseCallback>>,
}

impl<S: Slot> FixedCore<S> {
    pub(crate) fn new(threads: usize, capacity: usize) -> Arc<Self> {
        let threads = if threads == 0 {
            num_cpus::get().max(1)
        } else {
            threads
        };
        let per_slot_cap = if capacity == 0 {
            0
        } else {
            (capacity / threads).max(1)
        };
        let slots: Box<[S]> = (0..threads).map(|_| S::default()).collect();
        Arc::new(Self {
            stop: AtomicBool::new(false),
            slots,
            cursor: AtomicUsize::new(0),
            cursor_move_limit: best_move_limit(threads),
            per_slot_cap,
            steal_enabled: AtomicBool::new(false),
            max_steal: AtomicUsize::new(0),
            overflow: Mutex::new(Vec::new()),
            refuse_cb: Mutex::new(None),
        })
    }

    pub(crate) fn slots(&self) -> &[S] {
        &self.slots
    }

    pub(crate) fn thread_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Flip the stop flag; returns true for the first caller only.
    pub(crate) fn request_stop(&self) -> bool {
        !self.stop.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn steal_enabled(&self) -> bool {
        self.steal_enabled.load(Ordering::Acquire)
    }

    pub(crate) fn max_steal(&self) -> usize {
        self.max_steal.load(Ordering::Acquire)
    }

    pub(crate) fn enable_stealing(&self, max_victims: usize) -> Result<(), PoolError> {
        let threads = self.slots.len();
        let max = if max_victims == 0 {
            (threads / 4).clamp(1, 8)
        } else {
            max_victims
        };
        if max >= threads {
            return Err(PoolError::InvalidConfig(format!(
                "steal victim count {max} must lie in [1, {}]",
                threads.saturating_sub(1)
            )));
        }
        self.max_steal.store(max, Ordering::Release);
        self.steal_enabled.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) fn disable_stealing(&self) {
        self.steal_enabled.store(false, Ordering::Release);
    }

    /// Move the cursor to the least busy of the next few slots and return
    /// its index. Probe depth is bounded so placement stays O(1); an empty
    /// slot ends the probe early.
    pub(crate) fn least_busy(&self) -> usize {
        let mut best = self.cursor.load(Ordering::Relaxed);
        let mut probe = best;
        for _ in 0..self.cursor_move_limit {
            if self.slots[best].pending() == 0 {
                break;
            }
            probe = next_index(probe, self.slots.len());
            if self.slots[probe].pending() < self.slots[best].pending() {
                best = probe;
            }
        }
        self.cursor.store(best, Ordering::Relaxed);
        best
    }

    /// Find a slot with room for `want` more tasks, rotating the cursor.
    /// Unbounded pools always admit at the current cursor.
    pub(crate) fn admit(&self, want: usize) -> Option<usize> {
        if self.per_slot_cap == 0 {
            return Some(self.cursor.load(Ordering::Relaxed));
        }
        let start = self.cursor.load(Ordering::Relaxed);
        let mut current = start;
        loop {
            if self.slots[current].pending() + want <= self.per_slot_cap {
                self.cursor.store(current, Ordering::Relaxed);
                return Some(current);
            }
            current = next_index(current, self.slots.len());
            if current == start {
                return None;
            }
        }
    }

    pub(crate) fn submit_task(&self, task: Task) -> Result<(), PoolError> {
        if self.stopped() {
            return Err(PoolError::Shutdown);
        }
        match self.admit(1) {
            None => self.task_overflow(vec![task]),
            Some(_) => {
                let index = self.least_busy();
                self.slots[index].enqueue(task);
                Ok(())
            }
        }
    }

    /// Batched submit. The sequence is consumed destructively; an overflow
    /// mid-batch moves the remaining suffix into the overflow buffer and
    /// fires the refuse callback once.
    pub(crate) fn submit_batch(&self, tasks: Vec<Task>) -> Result<(), PoolError> {
        if self.stopped() {
            return Err(PoolError::Shutdown);
        }
        if self.per_slot_cap == 0 {
            let index = self.least_busy();
            self.slots[index].enqueue_batch(tasks.into_iter());
            return Ok(());
        }
        self.least_busy();
        let mut iter = tasks.into_iter();
        while let Some(task) = iter.next() {
            match self.admit(1) {
                Some(index) => self.slots[index].enqueue(task),
                None => {
                    let mut rest = vec![task];
                    rest.extend(iter);
                    return self.task_overflow(rest);
                }
            }
        }
        Ok(())
    }

    /// Park the refused tasks and notify. The buffer is replaced, not
    /// appended; without a callback the submission fails outright.
    pub(crate) fn task_overflow(&self, tasks: Vec<Task>) -> Result<(), PoolError> {
        *self.overflow.lock() = tasks;
        let mut cb = self.refuse_cb.lock();
        match cb.as_mut() {
            Some(cb) => {
                cb();
                Ok(())
            }
            None => Err(PoolError::Overflow),
        }
    }

    pub(crate) fn set_refuse_callback(&self, cb: RefuseCallback) -> Result<(), PoolError> {
        if self.per_slot_cap == 0 {
            return Err(PoolError::InvalidConfig(
                "refuse callback on an unbounded pool would never fire".into(),
            ));
        }
        *self.refuse_cb.lock() = Some(cb);
        Ok(())
    }

    pub(crate) fn pull_overflow(&self) -> Vec<Task> {
        std::mem::take(&mut *self.overflow.lock())
    }

    /// Quiescence rendezvous: every slot drains to zero pending while the
    /// caller is parked, then the waiting flags are dropped together.
    pub(crate) fn wait_all_idle(&self) {
        for slot in self.slots.iter() {
            slot.wait_idle();
        }
        for slot in self.slots.iter() {
            slot.clear_waiting();
        }
    }

    pub(crate) fn tasks_remain(&self) -> usize {
        self.slots.iter().map(Slot::pending).sum()
    }

    #[cfg(test)]
    pub(crate) fn per_slot_cap(&self) -> usize {
        self.per_slot_cap
    }
}

/// Probe depth for least-busy placement, derived from the worker count.
fn best_move_limit(threads: usize) -> usize {
    if threads == 1 {
        0
    } else {
        (threads / 4).clamp(1, 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::slot::DequeSlot;

    #[test]
    fn test_move_limit_bounds() {
        assert_eq!(best_move_limit(1), 0);
        assert_eq!(best_move_limit(2), 1);
        assert_eq!(best_move_limit(8), 2);
        assert_eq!(best_move_limit(64), 4);
    }

    #[test]
    fn test_capacity_split_across_slots() {
        let core = FixedCore::<DequeSlot>::new(4, 10);
        assert_eq!(core.per_slot_cap(), 2);
        let core = FixedCore::<DequeSlot>::new(4, 2);
        assert_eq!(core.per_slot_cap(), 1);
        let core = FixedCore::<DequeSlot>::new(4, 0);
        assert_eq!(core.per_slot_cap(), 0);
    }

    #[test]
    fn test_least_busy_prefers_shallow_slot() {
        let core = FixedCore::<DequeSlot>::new(4, 0);
        core.slots()[0].enqueue(Task::new(|| {}));
        core.slots()[0].enqueue(Task::new(|| {}));
        core.slots()[1].enqueue(Task::new(|| {}));
        // cursor starts at 0 (depth 2); slot 1 (depth 1) wins the probe
        assert_eq!(core.least_busy(), 1);
    }

    #[test]
    fn test_admit_rotates_until_room() {
        let core = FixedCore::<DequeSlot>::new(2, 2);
        assert_eq!(core.per_slot_cap(), 1);
        core.slots()[0].enqueue(Task::new(|| {}));
        assert_eq!(core.admit(1), Some(1));
        core.slots()[1].enqueue(Task::new(|| {}));
        assert_eq!(core.admit(1), None);
    }

    #[test]
    fn test_overflow_without_callback_errors() {
        let core = FixedCore::<DequeSlot>::new(1, 1);
        let result = core.task_overflow(vec![Task::new(|| {})]);
        assert_eq!(result, Err(PoolError::Overflow));
        assert_eq!(core.pull_overflow().len(), 1);
        // the buffer was transferred out
        assert!(core.pull_overflow().is_empty());
    }

    #[test]
    fn test_refuse_callback_rejected_when_unbounded() {
        let core = FixedCore::<DequeSlot>::new(2, 0);
        let result = core.set_refuse_callback(Box::new(|| {}));
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn test_stealing_validation() {
        let core = FixedCore::<DequeSlot>::new(4, 0);
        assert!(core.enable_stealing(0).is_ok());
        assert_eq!(core.max_steal(), 1);
        assert!(core.enable_stealing(3).is_ok());
        assert!(core.enable_stealing(4).is_err());

        let single = FixedCore::<DequeSlot>::new(1, 0);
        assert!(single.enable_stealing(0).is_err());
    }
}
