//! Error types for the execution engine.

use thiserror::Error;

/// Errors surfaced by pools, branches and supervisors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// Every slot is full and no refuse callback is installed.
    #[error("task overflow: pool capacity exhausted")]
    Overflow,

    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The component has been shut down; no further work is accepted.
    #[error("pool has been shut down")]
    Shutdown,

    /// A worker removal was requested but no workers remain.
    #[error("no worker available to remove")]
    NoWorker,
}

/// Errors delivered through a [`TaskFuture`](crate::future::TaskFuture).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FutureError {
    /// The submitted callable panicked; the payload is rendered best-effort.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was dropped before it could produce a result.
    #[error("task result channel disconnected")]
    Disconnected,

    /// The result did not arrive within the requested window.
    #[error("timed out waiting for task result")]
    Timeout,
}
