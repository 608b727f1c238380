//! # The unit of work the machine dispatches.
//!
//! Defines the core [`Task`] trait for async, cancelable bodies.
//!
//! - **[`Task`]** — trait for implementing async bodies with cancellation
//!   support
//! - **[`TaskRef`]** — shared handle (`Arc<dyn Task>`) for passing bodies
//!   into the machine
//! - **[`BoxTaskFuture`]** — type alias for boxed task futures
//!
//! ## Rules
//! - The crate provides [`TaskFn`](crate::TaskFn) — a function-backed
//!   implementation that wraps closures as tasks.
//! - Bodies receive a [`CancellationToken`] and **must** check
//!   `is_cancelled()` (or call the machine's cooperative shutdown check)
//!   periodically: cancellation is the only way a forced pool teardown can
//!   stop a running body.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Boxed future returned by [`Task::run`].
pub type BoxTaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// Shared handle to a task body.
pub type TaskRef = Arc<dyn Task>;

/// Asynchronous, cancelable body of work.
///
/// A `Task` can be dispatched multiple times; each call to
/// [`run`](Task::run) produces a fresh, independent future. The token wired
/// into the future is a child of its pool's token, so pool teardown reaches
/// every running body.
pub trait Task: Send + Sync + 'static {
    /// Returns a stable, human-readable task name.
    ///
    /// Carried into listener hooks, machine events, and log lines.
    fn name(&self) -> &str;

    /// Creates a new future that runs the body until completion or
    /// cancellation.
    ///
    /// The returned future must observe `ctx` cooperatively and exit
    /// promptly once it is cancelled; the machine never kills a body
    /// forcibly.
    fn run(&self, ctx: CancellationToken) -> BoxTaskFuture;
}
