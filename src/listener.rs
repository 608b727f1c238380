//! # Per-task event hooks: veto, completion, and failure interception.
//!
//! [`TaskEventListener`] wraps every dispatched task with three hooks:
//!
//! - [`before_task`](TaskEventListener::before_task) runs first; returning
//!   `false` vetoes the run — the body never executes and `after_task` is
//!   not invoked.
//! - [`after_task`](TaskEventListener::after_task) runs after successful
//!   completion only.
//! - [`on_exception`](TaskEventListener::on_exception) receives every
//!   failure; returning `None` swallows it (the handle completes
//!   successfully), returning `Some(e)` surfaces `e` through the default
//!   failure pathway (an error log plus a failed handle outcome).
//!
//! Implementations must not panic: a panicking hook takes its task's worker
//! slot down with it. Always handle the errors you don't know about.
//!
//! To observe more than one listener, compose decorators: embed a
//! [`ForwardingListener`] and override the hooks you care about.

use std::sync::Arc;

use crate::error::TaskError;

/// Identity of a task as seen by listener hooks.
#[derive(Clone, Debug)]
pub struct TaskContext {
    /// Task name.
    pub name: String,
    /// Name of the pool the task was dispatched to.
    pub pool: String,
}

/// Hooks around every task the machine dispatches.
pub trait TaskEventListener: Send + Sync {
    /// Executes before the task body.
    ///
    /// Return `true` to let the run continue, `false` to veto it.
    fn before_task(&self, task: &TaskContext) -> bool;

    /// Executes after the task body completed successfully.
    fn after_task(&self, task: &TaskContext);

    /// Executes when the task body failed.
    ///
    /// Return `Some(error)` to surface the error through the default
    /// failure pathway, or `None` to terminate propagation here.
    fn on_exception(&self, task: &TaskContext, error: TaskError) -> Option<TaskError>;
}

/// Basic default implementation of [`TaskEventListener`].
///
/// Permits every run, no-ops on completion, and passes failures back so the
/// default failure pathway can handle them.
pub struct DefaultListener;

impl TaskEventListener for DefaultListener {
    fn before_task(&self, _task: &TaskContext) -> bool {
        true
    }

    fn after_task(&self, _task: &TaskContext) {}

    fn on_exception(&self, task: &TaskContext, error: TaskError) -> Option<TaskError> {
        tracing::error!(task = %task.name, pool = %task.pool, %error, "task raised an error");
        Some(error)
    }
}

/// Base decorator that forwards all hooks to a wrapped listener.
///
/// Embed it in your own listener and delegate the hooks you don't
/// override:
///
/// ```
/// use taskmill::{ForwardingListener, TaskContext, TaskEventListener};
///
/// struct Counting {
///     inner: ForwardingListener,
/// }
///
/// impl TaskEventListener for Counting {
///     fn before_task(&self, task: &TaskContext) -> bool {
///         // count here...
///         self.inner.before_task(task)
///     }
///
///     fn after_task(&self, task: &TaskContext) {
///         self.inner.after_task(task);
///     }
///
///     fn on_exception(
///         &self,
///         task: &TaskContext,
///         error: taskmill::TaskError,
///     ) -> Option<taskmill::TaskError> {
///         self.inner.on_exception(task, error)
///     }
/// }
/// ```
pub struct ForwardingListener {
    target: Arc<dyn TaskEventListener>,
}

impl ForwardingListener {
    /// Wraps the given target listener.
    pub fn new(target: Arc<dyn TaskEventListener>) -> Self {
        Self { target }
    }
}

impl TaskEventListener for ForwardingListener {
    fn before_task(&self, task: &TaskContext) -> bool {
        self.target.before_task(task)
    }

    fn after_task(&self, task: &TaskContext) {
        self.target.after_task(task)
    }

    fn on_exception(&self, task: &TaskContext, error: TaskError) -> Option<TaskError> {
        self.target.on_exception(task, error)
    }
}
