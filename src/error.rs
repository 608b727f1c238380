//! # Error types used by the dispatch machinery and tasks.
//!
//! This module defines two main error enums:
//!
//! - [`MachineError`] errors raised by the dispatch framework itself
//!   (bad arguments, lifecycle-state violations).
//! - [`TaskError`] errors surfaced out of an individual task execution.
//!
//! Nullability errors of the classic taxonomy have no Rust representation:
//! the type system refuses absent callables, pools, and instances at compile
//! time. What remains are range violations and lifecycle-state violations.
//!
//! [`TaskError::Shutdown`] is the distinguished cooperative-shutdown signal.
//! The group latch re-raises it as-is instead of wrapping it, so callers can
//! always tell "the machine is going down" apart from an ordinary failure.

use std::time::Duration;

use thiserror::Error;

/// # Errors produced by the dispatch framework itself.
///
/// These represent misuse of the machinery: invalid arguments at a boundary
/// or an operation that is illegal in the current lifecycle state.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum MachineError {
    /// A bounded-pool submission named an empty pool.
    #[error("pool name cannot be empty")]
    EmptyPoolName,

    /// A wait budget of zero was passed where a positive one is required.
    #[error("wait time must be greater than zero")]
    ZeroWait,

    /// A time-to-live of zero was passed at collection construction.
    #[error("time to live must be greater than zero")]
    ZeroTtl,

    /// A timer period of zero was passed; the timer would spin.
    #[error("timer period must be greater than zero")]
    ZeroPeriod,

    /// New work was offered while the machine is shut down.
    #[error("cannot comply, task machine is shut down")]
    ShutdownActive,

    /// `reset` was invoked before `shutdown`.
    #[error("cannot reset until shutdown is issued first")]
    NotShutdown,

    /// A group-latch mutation was attempted with no group in the current
    /// context.
    #[error("no thread group exists for the current context; create one first")]
    NoActiveGroup,
}

impl MachineError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            MachineError::EmptyPoolName => "machine_empty_pool_name",
            MachineError::ZeroWait => "machine_zero_wait",
            MachineError::ZeroTtl => "machine_zero_ttl",
            MachineError::ZeroPeriod => "machine_zero_period",
            MachineError::ShutdownActive => "machine_shutdown_active",
            MachineError::NotShutdown => "machine_not_shutdown",
            MachineError::NoActiveGroup => "machine_no_active_group",
        }
    }
}

/// # Errors surfaced out of a dispatched task.
///
/// Cloneable so an outcome can be broadcast to every holder of a task
/// handle.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// A wait on the task (or the task itself) exceeded its deadline.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// The cooperative shutdown check fired: the machine is going down.
    ///
    /// Preserved (never rewrapped) when re-raised by the group latch.
    #[error("task machine shutdown requested")]
    Shutdown,

    /// The task observed cancellation of its token and exited early.
    ///
    /// This is **not an error** in the traditional sense; it signals
    /// intentional termination.
    #[error("task canceled")]
    Canceled,

    /// The task failed; carries the original cause as text.
    ///
    /// Panics inside a task body are captured into this variant as well.
    #[error("task failed: {reason}")]
    Failed {
        /// Human-readable cause.
        reason: String,
    },
}

impl TaskError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Shutdown => "task_shutdown",
            TaskError::Canceled => "task_canceled",
            TaskError::Failed { .. } => "task_failed",
        }
    }

    /// True when the error is the cooperative shutdown signal.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, TaskError::Shutdown)
    }

    /// Wraps an arbitrary failure reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        TaskError::Failed {
            reason: reason.into(),
        }
    }
}
