//! # Task handle: await, inspect, and cancel one dispatched task.
//!
//! A [`TaskHandle`] is handed back by every dispatch. It is cheap to clone;
//! every clone observes the same single completion. The execution wrapper
//! writes the outcome exactly once into a `watch` channel, which makes
//! completion visible both to the submitter and to a thread group holding
//! the same handle.
//!
//! If the pool carrying the task is forced down before the task ran, the
//! outcome channel is dropped unwritten and [`TaskHandle::wait`] reports an
//! abandonment failure.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Terminal result of one task execution.
pub type TaskOutcome = Result<(), TaskError>;

/// Cancellable, awaitable reference to a dispatched task.
#[derive(Clone)]
pub struct TaskHandle {
    name: String,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<TaskOutcome>>,
}

impl TaskHandle {
    /// Creates the completion channel and the handle observing it.
    ///
    /// The returned sender is owned by the execution wrapper and written
    /// exactly once.
    pub(crate) fn channel(
        name: impl Into<String>,
        cancel: CancellationToken,
    ) -> (watch::Sender<Option<TaskOutcome>>, TaskHandle) {
        let (tx, rx) = watch::channel(None);
        let handle = TaskHandle {
            name: name.into(),
            cancel,
            outcome: rx,
        };
        (tx, handle)
    }

    /// The task's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests cancellation of this task only.
    ///
    /// Cooperative: the body keeps running until it next observes its
    /// token.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once the task has a terminal outcome.
    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Returns the outcome if the task already finished.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.outcome.borrow().clone()
    }

    /// Awaits completion up to `timeout`.
    ///
    /// - `Ok(outcome)` — the task finished within the deadline; the outcome
    ///   is the body's own success or failure.
    /// - `Err(TaskError::Timeout)` — the deadline passed first.
    /// - `Err(TaskError::Failed)` — the task was abandoned (its pool was
    ///   torn down before the body could finish).
    pub async fn wait(&self, timeout: Duration) -> Result<TaskOutcome, TaskError> {
        let mut rx = self.outcome.clone();

        let result = match tokio::time::timeout(timeout, rx.wait_for(|o| o.is_some())).await {
            Err(_elapsed) => Err(TaskError::Timeout { timeout }),
            Ok(Ok(observed)) => match observed.as_ref() {
                Some(outcome) => Ok(outcome.clone()),
                // wait_for only returns on Some
                None => Err(TaskError::failed("completion observed without an outcome")),
            },
            Ok(Err(_sender_gone)) => Err(TaskError::failed(format!(
                "task '{}' was abandoned before completing",
                self.name
            ))),
        };
        result
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}
