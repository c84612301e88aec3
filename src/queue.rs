//! Mutex-guarded double-ended queue.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// A thread-safe deque with front insertion for urgent items.
///
/// All operations are O(1) amortized under a single lock. The queue is
/// unbounded; capacity enforcement belongs to the caller.
pub struct TaskQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> TaskQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Append to the back.
    pub fn push_back(&self, value: T) {
        self.inner.lock().push_back(value);
    }

    /// Insert at the front, ahead of queued items.
    pub fn push_front(&self, value: T) {
        self.inner.lock().push_front(value);
    }

    /// Pop the front item, if any.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let q = TaskQueue::new();
        q.push_back(1);
        q.push_back(2);
        q.push_back(3);
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), Some(3));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_push_front_jumps_queue() {
        let q = TaskQueue::new();
        q.push_back("normal");
        q.push_front("urgent");
        assert_eq!(q.try_pop(), Some("urgent"));
        assert_eq!(q.try_pop(), Some("normal"));
    }

    #[test]
    fn test_len_tracks_contents() {
        let q = TaskQueue::new();
        assert!(q.is_empty());
        q.push_back(0);
        q.push_front(1);
        assert_eq!(q.len(), 2);
        q.try_pop();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_each_item_seen_by_one_consumer() {
        let q = Arc::new(TaskQueue::new());
        for i in 0..1000 {
            q.push_back(i);
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let q = Arc::clone(&q);
            handles.push(thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(v) = q.try_pop() {
                    seen.push(v);
                }
                seen
            }));
        }

        let mut all: Vec<i32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }
}
