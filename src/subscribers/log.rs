//! # LogSubscriber — event-to-log bridge
//!
//! A minimal subscriber that forwards machine events to `tracing`. Use it
//! when an embedder wants pool and shutdown milestones in its logs without
//! writing a subscriber of its own.

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Forwards machine events to `tracing`.
pub struct LogSubscriber;

impl LogSubscriber {
    /// Construct a new [`LogSubscriber`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Subscribe for LogSubscriber {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::PoolCreating => {
                tracing::debug!(pool = ?e.pool, "creating pool");
            }
            EventKind::PoolCreated => {
                tracing::debug!(pool = ?e.pool, "pool created");
            }
            EventKind::PoolResolved => {
                tracing::trace!(pool = ?e.pool, "pool resolved");
            }
            EventKind::TaskSubmitted => {
                tracing::trace!(pool = ?e.pool, task = ?e.task, "task submitted");
            }
            EventKind::CallerRan => {
                tracing::debug!(pool = ?e.pool, task = ?e.task, "queue full, submitter ran task inline");
            }
            EventKind::TaskVetoed => {
                tracing::debug!(task = ?e.task, "task vetoed by listener");
            }
            EventKind::TaskStopped => {
                tracing::trace!(task = ?e.task, "task stopped");
            }
            EventKind::TaskFailed => {
                tracing::error!(task = ?e.task, error = ?e.error, "task failed");
            }
            EventKind::ShutdownRequested => {
                tracing::info!(budget = ?e.timeout, "shutdown requested");
            }
            EventKind::PoolDrained => {
                tracing::debug!(pool = ?e.pool, "pool drained");
            }
            EventKind::PoolForcedDown => {
                tracing::warn!(pool = ?e.pool, budget = ?e.timeout, "pool missed its budget, forced down");
            }
            EventKind::AllStoppedWithin => {
                tracing::info!("all pools stopped within the wait budget");
            }
            EventKind::GraceExceeded => {
                tracing::warn!("shutdown grace exceeded; at least one pool was forced down");
            }
            EventKind::MachineReset => {
                tracing::info!("machine reset");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogSubscriber"
    }
}
