//! Configuration structures for every engine component.
//!
//! Each struct derives serde with per-field defaults, offers `with_*`
//! builders, and validates before use:
//!
//! ```
//! use taskmill::PoolConfig;
//!
//! let config = PoolConfig::new()
//!     .with_worker_count(4)
//!     .with_capacity(100)
//!     .with_stealing(2);
//! assert!(config.validate().is_ok());
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::branch::WaitStrategy;
use crate::timer::Recurrence;

/// Default worker count: one per logical CPU.
fn default_worker_count() -> usize {
    num_cpus::get().max(1)
}

fn default_initial_workers() -> usize {
    1
}

fn default_wait_strategy() -> WaitStrategy {
    WaitStrategy::LowLatency
}

fn default_min_workers() -> usize {
    1
}

fn default_interval_ms() -> u64 {
    500
}

fn default_recurrence() -> Recurrence {
    Recurrence::Steady
}

/// Configuration for the fixed pools ([`SteadyPool`](crate::SteadyPool),
/// [`BalancedPool`](crate::BalancedPool)).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker threads. `0` resolves to the CPU count.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Total task capacity, split evenly across workers. `0` = unbounded.
    #[serde(default)]
    pub capacity: usize,

    /// Whether idle workers steal from neighbors.
    #[serde(default)]
    pub steal_enabled: bool,

    /// Steal probe bound. `0` derives it from the worker count; explicit
    /// values must stay below the worker count.
    #[serde(default)]
    pub max_victims: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            capacity: 0,
            steal_enabled: false,
            max_victims: 0,
        }
    }
}

impl PoolConfig {
    /// Defaults: CPU-count workers, unbounded, no stealing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count (`0` = CPU count).
    #[must_use]
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the total capacity (`0` = unbounded).
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Enable stealing with the given probe bound (`0` = auto).
    #[must_use]
    pub fn with_stealing(mut self, max_victims: usize) -> Self {
        self.steal_enabled = true;
        self.max_victims = max_victims;
        self
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.steal_enabled && self.worker_count == 1 {
            return Err("stealing requires at least two workers".into());
        }
        if self.steal_enabled && self.worker_count != 0 && self.max_victims >= self.worker_count {
            return Err(format!(
                "max_victims {} must stay below worker_count {}",
                self.max_victims, self.worker_count
            ));
        }
        Ok(())
    }
}

/// Configuration for [`ElasticPool`](crate::ElasticPool).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticConfig {
    /// Workers spawned at construction.
    #[serde(default = "default_initial_workers")]
    pub initial_workers: usize,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            initial_workers: default_initial_workers(),
        }
    }
}

impl ElasticConfig {
    /// Defaults: one initial worker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial worker count.
    #[must_use]
    pub fn with_initial_workers(mut self, count: usize) -> Self {
        self.initial_workers = count;
        self
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Configuration for [`WorkBranch`](crate::WorkBranch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfig {
    /// Workers spawned at construction (floor one).
    #[serde(default = "default_initial_workers")]
    pub initial_workers: usize,

    /// Idle behavior of the branch workers.
    #[serde(default = "default_wait_strategy")]
    pub wait_strategy: WaitStrategy,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            initial_workers: default_initial_workers(),
            wait_strategy: default_wait_strategy(),
        }
    }
}

impl BranchConfig {
    /// Defaults: one worker, low-latency waits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial worker count.
    #[must_use]
    pub fn with_initial_workers(mut self, count: usize) -> Self {
        self.initial_workers = count;
        self
    }

    /// Set the wait strategy.
    #[must_use]
    pub fn with_wait_strategy(mut self, strategy: WaitStrategy) -> Self {
        self.wait_strategy = strategy;
        self
    }
}

/// Configuration for [`Supervisor`](crate::Supervisor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Lower worker bound for supervised branches.
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Upper worker bound; must exceed `min_workers`.
    #[serde(default = "default_worker_count")]
    pub max_workers: usize,

    /// Milliseconds between ticks.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_worker_count(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl SupervisorConfig {
    /// Defaults: `[1, cpu count]` bounds, 500 ms interval.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker bounds.
    #[must_use]
    pub fn with_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_workers = min;
        self.max_workers = max;
        self
    }

    /// Set the tick interval in milliseconds.
    #[must_use]
    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// The tick interval as a `Duration`.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers <= self.min_workers {
            return Err(format!(
                "bounds must satisfy min < max, got [{}, {}]",
                self.min_workers, self.max_workers
            ));
        }
        if self.interval_ms == 0 {
            return Err("interval_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Configuration for [`TimerScheduler`](crate::TimerScheduler).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Re-arming policy for repeating timers.
    #[serde(default = "default_recurrence")]
    pub recurrence: Recurrence,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            recurrence: default_recurrence(),
        }
    }
}

impl TimerConfig {
    /// Defaults: steady recurrence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recurrence policy.
    #[must_use]
    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = recurrence;
        self
    }
}

/// Root configuration: named component sections, loadable from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fixed-pool sections by name.
    #[serde(default)]
    pub pools: HashMap<String, PoolConfig>,

    /// Branch sections by name.
    #[serde(default)]
    pub branches: HashMap<String, BranchConfig>,

    /// Supervisor sections by name.
    #[serde(default)]
    pub supervisors: HashMap<String, SupervisorConfig>,
}

impl EngineConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        for (name, supervisor) in &self.supervisors {
            supervisor
                .validate()
                .map_err(|e| format!("supervisor `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let config: EngineConfig =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        config.validate()?;
        Ok(config)
    }
}
