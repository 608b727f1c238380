//! # Events emitted by the task machine.
//!
//! The [`EventKind`] enum classifies machine observations:
//! - **Pool events**: creation and resolution of worker pools.
//! - **Dispatch events**: submission, veto, completion, failure, and
//!   caller-runs backpressure.
//! - **Shutdown events**: shutdown request, per-pool drain results, and the
//!   terminal outcome of the grace period.
//!
//! [`Event`] carries optional metadata (pool name, task name, error text,
//! timeout) attached builder-style.
//!
//! ## Ordering
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically, so consumers can order events delivered through async
//! channels.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of machine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Pool events ===
    /// A named bounded pool is about to be created.
    PoolCreating,
    /// A named bounded pool was created.
    PoolCreated,
    /// A pool lookup found an existing pool.
    PoolResolved,

    // === Dispatch events ===
    /// A task was submitted to a pool.
    TaskSubmitted,
    /// A bounded pool was saturated and the submitter ran the task inline.
    CallerRan,
    /// The task-event listener vetoed a run; the body did not execute.
    TaskVetoed,
    /// A task completed (success, graceful cancellation, or swallowed
    /// error).
    TaskStopped,
    /// A task failed and the failure was surfaced.
    TaskFailed,

    // === Shutdown events ===
    /// Machine shutdown started.
    ShutdownRequested,
    /// A pool drained its queue within its shutdown budget.
    PoolDrained,
    /// A pool missed its shutdown budget and was forced down.
    PoolForcedDown,
    /// Every pool drained within the overall wait.
    AllStoppedWithin,
    /// At least one pool had to be forced down.
    GraceExceeded,
    /// The machine was re-initialized after shutdown.
    MachineReset,
}

/// Machine event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Pool name, if applicable.
    pub pool: Option<String>,
    /// Task name, if applicable.
    pub task: Option<String>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
    /// Relevant deadline or budget, if any.
    pub timeout: Option<Duration>,
}

impl Event {
    /// Creates a new event of the given kind with the next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            pool: None,
            task: None,
            error: None,
            timeout: None,
        }
    }

    /// Attaches a pool name.
    pub fn with_pool(mut self, name: impl Into<String>) -> Self {
        self.pool = Some(name.into());
        self
    }

    /// Attaches a task name.
    pub fn with_task(mut self, name: impl Into<String>) -> Self {
        self.task = Some(name.into());
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches a deadline or budget.
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout = Some(d);
        self
    }
}
