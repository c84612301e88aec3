//! Per-worker slot state for the fixed-size pools.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::task::Task;

/// Depth accounting, enqueue paths and the wait-idle handshake shared by
/// every slot flavor.
pub(crate) trait Slot: Default + Send + Sync + 'static {
    /// Tasks queued in or currently executing from this slot.
    fn pending(&self) -> usize;

    /// Push one task onto the slot's queue.
    fn enqueue(&self, task: Task);

    /// Push a run of tasks under one critical section.
    fn enqueue_batch<I>(&self, tasks: I)
    where
        I: Iterator<Item = Task>;

    /// Account one executed task.
    fn finish_one(&self);

    /// Whether a wait-idle caller is parked on this slot.
    fn is_waiting(&self) -> bool;

    /// Park until the pending count reaches zero. Sets the waiting flag;
    /// the caller clears it with [`Slot::clear_waiting`] once every slot
    /// has drained.
    fn wait_idle(&self);

    /// Drop the waiting flag after a completed wait-idle round.
    fn clear_waiting(&self);

    /// Wake a parked wait-idle caller.
    fn notify_done(&self);
}

/// State common to both slot flavors.
#[derive(Default)]
struct SlotCore {
    pending: AtomicUsize,
    waiting: AtomicBool,
    idle_lock: Mutex<()>,
    idle_cv: Condvar,
}

impl SlotCore {
    fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn add_pending(&self, n: usize) {
        self.pending.fetch_add(n, Ordering::AcqRel);
    }

    fn sub_pending(&self, n: usize) {
        self.pending.fetch_sub(n, Ordering::AcqRel);
    }

    fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }

    fn wait_idle(&self) {
        self.waiting.store(true, Ordering::Release);
        let mut guard = self.idle_lock.lock();
        while self.pending.load(Ordering::Acquire) != 0 {
            self.idle_cv.wait(&mut guard);
        }
    }

    fn clear_waiting(&self) {
        self.waiting.store(false, Ordering::Release);
    }

    fn notify_done(&self) {
        let _guard = self.idle_lock.lock();
        self.idle_cv.notify_one();
    }
}

/// Steady-pool slot: producers and thieves contend on the public queue while
/// the owning worker drains a private buffer it swapped out earlier.
#[derive(Default)]
pub(crate) struct DequeSlot {
    core: SlotCore,
    public_q: Mutex<VecDeque<Task>>,
}

impl DequeSlot {
    /// Swap the public queue into the worker's buffer. One exchange under
    /// the lock; the drain itself runs without it.
    pub(crate) fn swap_into(&self, buffer: &mut VecDeque<Task>) {
        let mut q = self.public_q.lock();
        std::mem::swap(&mut *q, buffer);
    }

    /// Victim side of a steal: move the whole public queue into the thief's
    /// buffer. Non-blocking; a contended lock means no transfer.
    pub(crate) fn try_give(&self, thief: &DequeSlot, buffer: &mut VecDeque<Task>) -> bool {
        let Some(mut q) = self.public_q.try_lock() else {
            return false;
        };
        if q.is_empty() {
            return false;
        }
        let moved = q.len();
        buffer.extend(q.drain(..));
        drop(q);
        self.core.sub_pending(moved);
        thief.core.add_pending(moved);
        true
    }
}

impl Slot for DequeSlot {
    fn pending(&self) -> usize {
        self.core.pending()
    }

    fn enqueue(&self, task: Task) {
        let mut q = self.public_q.lock();
        q.push_back(task);
        self.core.add_pending(1);
    }

    fn enqueue_batch<I>(&self, tasks: I)
    where
        I: Iterator<Item = Task>,
    {
        let mut q = self.public_q.lock();
        let before = q.len();
        q.extend(tasks);
        self.core.add_pending(q.len() - before);
    }

    fn finish_one(&self) {
        self.core.sub_pending(1);
    }

    fn is_waiting(&self) -> bool {
        self.core.is_waiting()
    }

    fn wait_idle(&self) {
        self.core.wait_idle();
    }

    fn clear_waiting(&self) {
        self.core.clear_waiting();
    }

    fn notify_done(&self) {
        self.core.notify_done();
    }
}

/// Balanced-pool slot: a single locked queue; work moves one task at a time.
#[derive(Default)]
pub(crate) struct MonoSlot {
    core: SlotCore,
    queue: Mutex<VecDeque<Task>>,
}

impl MonoSlot {
    /// Pop one task from the local queue.
    pub(crate) fn try_load(&self) -> Option<Task> {
        self.queue.lock().pop_front()
    }

    /// Victim side of a steal: hand exactly one task to the thief.
    pub(crate) fn try_give_one(&self, thief: &MonoSlot) -> Option<Task> {
        let mut q = self.queue.try_lock()?;
        let task = q.pop_front()?;
        drop(q);
        self.core.sub_pending(1);
        thief.core.add_pending(1);
        Some(task)
    }
}

impl Slot for MonoSlot {
    fn pending(&self) -> usize {
        self.core.pending()
    }

    fn enqueue(&self, task: Task) {
        let mut q = self.queue.lock();
        q.push_back(task);
        self.core.add_pending(1);
    }

    fn enqueue_batch<I>(&self, tasks: I)
    where
        I: Iterator<Item = Task>,
    {
        let mut q = self.queue.lock();
        let before = q.len();
        q.extend(tasks);
        self.core.add_pending(q.len() - before);
    }

    fn finish_one(&self) {
        self.core.sub_pending(1);
    }

    fn is_waiting(&self) -> bool {
        self.core.is_waiting()
    }

    fn wait_idle(&self) {
        self.core.wait_idle();
    }

    fn clear_waiting(&self) {
        self.core.clear_waiting();
    }

    fn notify_done(&self) {
        self.core.notify_done();
    }
}
