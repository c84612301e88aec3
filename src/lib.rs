//! # taskmill
//!
//! An in-process task execution engine built on OS threads: fixed worker
//! pools with sharded queues and work stealing, an elastic pool whose worker
//! set resizes at runtime, a supervised worker group with an external resize
//! controller, and a timer scheduler that dispatches deferred callbacks onto
//! any of them.
//!
//! ## Components
//!
//! - [`SteadyPool`] — fixed workers, per-worker double queues drained by
//!   bulk swap, least-busy placement, optional stealing, capacity with an
//!   overflow hook.
//! - [`BalancedPool`] — same contract over single-queue slots; work moves
//!   one task at a time.
//! - [`ElasticPool`] — one shared queue, `add`/`del`/`adjust` threads at
//!   runtime, throughput sampling for external controllers.
//! - [`WorkBranch`] + [`Supervisor`] — a single-queue group resized each
//!   tick within `[min, max]` bounds, with urgent and sequence submission.
//! - [`TimerScheduler`] — deadline-ordered timers with steady or dynamic
//!   recurrence and pre-dispatch cancellation.
//!
//! ## Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use taskmill::SteadyPool;
//!
//! let pool = SteadyPool::new(4, 0);
//! let counter = Arc::new(AtomicUsize::new(0));
//! for _ in 0..100 {
//!     let counter = Arc::clone(&counter);
//!     pool.submit(move || {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     })
//!     .unwrap();
//! }
//! pool.wait_all_idle();
//! assert_eq!(counter.load(Ordering::Relaxed), 100);
//! ```
//!
//! Results come back through futures:
//!
//! ```
//! use taskmill::ElasticPool;
//!
//! let pool = ElasticPool::new(2);
//! let future = pool.submit_for_return(|| 6 * 7).unwrap();
//! assert_eq!(future.get(), Ok(42));
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod branch;
pub mod config;
pub mod error;
pub mod future;
pub mod pool;
pub mod queue;
pub mod supervisor;
pub mod task;
pub mod timer;
pub mod util;

pub use branch::{WaitStrategy, WorkBranch};
pub use config::{
    BranchConfig, ElasticConfig, EngineConfig, PoolConfig, SupervisorConfig, TimerConfig,
};
pub use error::{FutureError, PoolError};
pub use future::{Futures, TaskFuture};
pub use pool::{BalancedPool, ElasticPool, SteadyPool};
pub use queue::TaskQueue;
pub use supervisor::Supervisor;
pub use task::Task;
pub use timer::{Recurrence, TaskSpawner, TimerId, TimerScheduler};
