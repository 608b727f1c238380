//! # Subscriber contract for machine events.
//!
//! Implement [`Subscribe`] to watch pool lifecycle, dispatch outcomes, and
//! shutdown milestones. Delivery is queued per subscriber (see
//! [`SubscriberSet`](crate::subscribers::SubscriberSet)): a slow handler —
//! a metrics push, an audit write — delays neither the machine nor the
//! other subscribers, and overflow costs that one subscriber events, never
//! the publisher.
//!
//! A subscriber that only cares about some of the traffic (say, shutdown
//! milestones but not per-task noise) should override
//! [`wants`](Subscribe::wants); filtered-out events never take up queue
//! space.

use async_trait::async_trait;

use crate::events::{Event, EventKind};

use super::set::DEFAULT_LANE_CAPACITY;

/// Receiver of machine events.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event, on this subscriber's own worker.
    ///
    /// Prefer async I/O and cooperative waits; blocking here stalls only
    /// this subscriber's lane, but it stalls it completely.
    async fn on_event(&self, event: &Event);

    /// Whether this subscriber should receive events of `kind`.
    ///
    /// Defaults to everything.
    fn wants(&self, _kind: EventKind) -> bool {
        true
    }

    /// Name used in drop and panic log lines.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this subscriber's event queue.
    ///
    /// Size it to the handler's latency: a queue that is regularly full
    /// means dropped events for this subscriber.
    fn queue_capacity(&self) -> usize {
        DEFAULT_LANE_CAPACITY
    }
}
