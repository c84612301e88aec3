//! One-shot result delivery for `submit_for_return`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};

use crate::error::FutureError;
use crate::task::Task;
use crate::util::panic_message;

/// The receiving half of a submitted task's result.
///
/// Produced by the `submit_for_return` family. [`get`](TaskFuture::get)
/// blocks until the callable has run; a panic inside the callable is
/// captured and rethrown here as [`FutureError::Panicked`].
pub struct TaskFuture<R> {
    rx: Receiver<Result<R, FutureError>>,
}

impl<R> TaskFuture<R> {
    /// Block until the result is available.
    pub fn get(self) -> Result<R, FutureError> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(FutureError::Disconnected),
        }
    }

    /// Non-blocking poll. `None` means the task has not finished yet.
    pub fn try_get(&self) -> Option<Result<R, FutureError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(FutureError::Disconnected)),
        }
    }

    /// Block until the result arrives or the timeout expires.
    pub fn get_timeout(&self, timeout: Duration) -> Result<R, FutureError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(FutureError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(FutureError::Disconnected),
        }
    }
}

/// A collection of futures awaited together.
///
/// ```no_run
/// use taskmill::{Futures, SteadyPool};
///
/// let pool = SteadyPool::new(4, 0);
/// let mut futures = Futures::new();
/// for i in 0..8 {
///     futures.push(pool.submit_for_return(move || i * i).unwrap());
/// }
/// let squares = futures.get().unwrap();
/// assert_eq!(squares.len(), 8);
/// ```
pub struct Futures<R> {
    handles: Vec<TaskFuture<R>>,
}

impl<R> Futures<R> {
    /// An empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Add a future to the collection.
    pub fn push(&mut self, future: TaskFuture<R>) {
        self.handles.push(future);
    }

    /// Number of collected futures.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Block until every task has finished, discarding results.
    pub fn wait(self) {
        for handle in self.handles {
            let _ = handle.get();
        }
    }

    /// Block for all results in submission order. The first failure wins.
    pub fn get(self) -> Result<Vec<R>, FutureError> {
        self.handles.into_iter().map(TaskFuture::get).collect()
    }
}

impl<R> Default for Futures<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Package a callable into a task plus the future observing its result.
pub(crate) fn promise_task<R, F>(f: F) -> (Task, TaskFuture<R>)
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let (tx, rx) = bounded(1);
    let task = Task::new(move || {
        let outcome = catch_unwind(AssertUnwindSafe(f))
            .map_err(|payload| FutureError::Panicked(panic_message(payload.as_ref())));
        let _ = tx.send(outcome);
    });
    (task, TaskFuture { rx })
}
