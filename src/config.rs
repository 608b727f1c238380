//! # Machine and pool configuration.
//!
//! [`MachineConfig`] defines machine-wide behavior: the default sizing for
//! lazily created bounded pools, the shutdown grace used by the
//! termination-signal hook, and the event-bus capacity.
//!
//! [`PoolConfig`] sizes one bounded pool: queue capacity, core and maximum
//! worker counts, and the idle time-to-live after which a waiting worker
//! (core workers included, so process teardown is never blocked on an idle
//! pool) retires itself.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use taskmill::{MachineConfig, PoolConfig};
//!
//! let mut cfg = MachineConfig::default();
//! cfg.shutdown_grace = Duration::from_secs(5);
//! cfg.pool.queue_capacity = 16;
//!
//! assert_eq!(cfg.pool.queue_capacity, 16);
//! assert!(cfg.pool.max_workers > cfg.pool.core_workers);
//! ```

use std::time::Duration;

/// Core workers in a bounded pool when the machine has that many cpus.
pub const DEFAULT_CORE_WORKERS: usize = 5;

/// Tasks held in a bounded pool's queue before work is pushed back to the
/// submitter.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// How long an idle worker waits for work before retiring.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60);

/// Grace budget the termination-signal hook hands to `shutdown`.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Sizing for one bounded worker pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Capacity of the work queue. When the queue is full and the pool is
    /// at `max_workers`, the submitter runs the task inline.
    pub queue_capacity: usize,
    /// Workers added eagerly while demand exists.
    pub core_workers: usize,
    /// Upper bound on workers when the queue is full.
    pub max_workers: usize,
    /// Idle time after which any worker retires.
    pub idle_ttl: Duration,
}

impl Default for PoolConfig {
    /// Sizes the pool from the machine:
    /// - `core_workers = min(5, cpus)`
    /// - `max_workers = cpus + 1`, floored at `6`
    /// - `queue_capacity = 100`
    /// - `idle_ttl = 60s`
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let core_workers = DEFAULT_CORE_WORKERS.min(cpus);
        let max_workers = (cpus + 1).max(DEFAULT_CORE_WORKERS + 1);

        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            core_workers,
            max_workers,
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }
}

/// Machine-wide configuration.
#[derive(Clone, Debug)]
pub struct MachineConfig {
    /// Default sizing for bounded pools created on demand.
    pub pool: PoolConfig,
    /// Wait budget the termination-signal hook passes to `shutdown`.
    pub shutdown_grace: Duration,
    /// Capacity of the machine event bus.
    pub bus_capacity: usize,
}

impl Default for MachineConfig {
    /// Provides a default configuration:
    /// - `pool = PoolConfig::default()`
    /// - `shutdown_grace = 10s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            bus_capacity: 1024,
        }
    }
}
