//! # Timeout controller.
//!
//! Runs a body under a wall-clock deadline. The body executes on a worker
//! pool while the caller waits; whatever keeps the body from completing
//! cleanly in time — the deadline passing, the body failing or panicking,
//! the pool being torn down under it — surfaces as the same
//! [`TaskError::Timeout`], with the underlying cause sent to the log. A
//! caller therefore needs exactly one rule: `Err` means the body did not
//! complete in time.
//!
//! The worker is never killed. On every non-success path the body's token
//! is cancelled and the body keeps running until it next observes it, so
//! bodies must check cancellation cooperatively. A body that completed in
//! time is left alone.
//!
//! By default each controller owns a private cached pool whose workers are
//! recycled between calls; an externally managed pool can be supplied
//! instead with [`TimeoutController::with_pool`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_IDLE_TTL;
use crate::error::{MachineError, TaskError};
use crate::pool::Pool;
use crate::tasks::TaskHandle;

/// Deadline-bounded execution of bodies on a worker pool.
pub struct TimeoutController {
    pool: Arc<Pool>,
}

impl TimeoutController {
    /// Creates a controller with its own cached worker pool.
    pub fn new() -> Self {
        Self {
            pool: Pool::cached(DEFAULT_IDLE_TTL),
        }
    }

    /// Creates a controller running bodies on an externally managed pool.
    pub fn with_pool(pool: Arc<Pool>) -> Self {
        Self { pool }
    }

    /// Runs `body` and waits for it up to `timeout`.
    ///
    /// - `Ok(())` — the body finished cleanly in time.
    /// - `Err(TaskError::Timeout)` — anything else: the deadline passed,
    ///   or the body failed or panicked within it. The body's token is
    ///   cancelled; a still-running body keeps going until it observes
    ///   it. The underlying failure, when there is one, goes to the log.
    /// - `Err(TaskError::Shutdown)` — the executor pool refused the body
    ///   because it is already sealed; nothing ran.
    ///
    /// A zero `timeout` is a deadline that has already passed: the body is
    /// not run and `Err(Timeout)` is returned immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn execute<F, Fut>(&self, body: F, timeout: Duration) -> Result<(), TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        if timeout.is_zero() {
            return Err(TaskError::Timeout { timeout });
        }

        let token = self.pool.cancel_token().child_token();
        let fut = body(token.clone());

        let (outcome_tx, handle) = TaskHandle::channel("timeout-bounded", token.clone());
        let job = Box::pin(async move {
            let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(TaskError::failed(crate::panic_reason(&panic))),
            };
            let _ = outcome_tx.send(Some(outcome));
        });

        if let Err(err) = self.pool.submit(job).await {
            return match err {
                MachineError::ShutdownActive => Err(TaskError::Shutdown),
                other => Err(TaskError::failed(other.to_string())),
            };
        }

        match handle.wait(timeout).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(failure)) => {
                // An in-deadline failure is still "did not complete in
                // time" to the caller; only the log keeps the cause.
                token.cancel();
                tracing::debug!(%failure, "deadline-bounded body failed before its deadline");
                Err(TaskError::Timeout { timeout })
            }
            Err(_not_done) => {
                token.cancel();
                Err(TaskError::Timeout { timeout })
            }
        }
    }
}

impl Default for TimeoutController {
    fn default() -> Self {
        Self::new()
    }
}
