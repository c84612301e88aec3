//! Small shared helpers.

pub mod telemetry;

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::task::Task;

/// Advance a ring index by one, wrapping at `len`.
#[inline]
pub(crate) fn next_index(index: usize, len: usize) -> usize {
    let next = index + 1;
    if next == len {
        0
    } else {
        next
    }
}

/// Render a panic payload for logging and future delivery.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}

/// Run a task, isolating panics so the calling worker survives.
///
/// The panic is reported on the standard error sink with the worker's
/// identity; execution of later tasks is unaffected.
pub(crate) fn run_logged(task: Task) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
        let thread = std::thread::current();
        tracing::error!(
            worker = thread.name().unwrap_or("unnamed"),
            panic = %panic_message(payload.as_ref()),
            "task panicked; worker continues"
        );
    }
}
