//! Type-erased task container.

use std::fmt;

/// A move-only, type-erased unit of work.
///
/// A `Task` owns an arbitrary `FnOnce()` callable and guarantees at most one
/// invocation: [`Task::run`] consumes the handle. Dropping an unrun task
/// releases whatever state the callable captured.
///
/// ```
/// use taskmill::Task;
///
/// let task = Task::new(|| println!("hello"));
/// assert!(task.is_set());
/// task.run();
/// ```
pub struct Task {
    exec: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Task {
    /// Wrap a callable.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            exec: Some(Box::new(f)),
        }
    }

    /// An empty task; running it is a no-op.
    #[must_use]
    pub fn empty() -> Self {
        Self { exec: None }
    }

    /// Replace the held callable, dropping any previous one unrun.
    pub fn reset<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.exec = Some(Box::new(f));
    }

    /// Whether a callable is currently held.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.exec.is_some()
    }

    /// Invoke the callable, consuming the task.
    pub fn run(mut self) {
        if let Some(f) = self.exec.take() {
            f();
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("set", &self.is_set()).finish()
    }
}
