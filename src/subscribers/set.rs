//! # Subscriber lanes: queued delivery of machine events.
//!
//! [`SubscriberSet::spawn`] subscribes to a [`Bus`] and opens one **lane**
//! per subscriber: a bounded queue plus a worker task that feeds events to
//! [`Subscribe::on_event`]. A single pump task drains the bus and offers
//! each event to every interested lane, so the publisher never waits on a
//! subscriber and subscribers never wait on each other.
//!
//! Delivery rules, per lane:
//! - events the subscriber does not [`want`](Subscribe::wants) are skipped
//!   before they can occupy queue space;
//! - a full queue drops the event for that lane only, with a running drop
//!   count in the warning so a persistently slow subscriber is visible in
//!   the logs;
//! - a panicking subscriber loses that one event, not its lane.
//!
//! The pump ends when the bus closes (its machine was dropped), closing
//! every lane behind it; [`SubscriberSet::close`] ends it early.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::events::{Bus, Event};

use super::Subscribe;

/// Queue capacity a lane gets when its subscriber does not pick one.
pub const DEFAULT_LANE_CAPACITY: usize = 1024;

/// One subscriber's queue, worker, and delivery bookkeeping.
struct Lane {
    subscriber: Arc<dyn Subscribe>,
    queue: mpsc::Sender<Arc<Event>>,
    worker: JoinHandle<()>,
    dropped: u64,
}

impl Lane {
    fn open(subscriber: Arc<dyn Subscribe>) -> Self {
        let (queue, mut incoming) =
            mpsc::channel::<Arc<Event>>(subscriber.queue_capacity().max(1));

        let handler = Arc::clone(&subscriber);
        let worker = tokio::spawn(async move {
            while let Some(event) = incoming.recv().await {
                let handled = AssertUnwindSafe(handler.on_event(&event)).catch_unwind().await;
                if let Err(fault) = handled {
                    tracing::error!(
                        subscriber = handler.name(),
                        reason = %crate::panic_reason(&fault),
                        "subscriber panicked while handling an event"
                    );
                }
            }
        });

        Self {
            subscriber,
            queue,
            worker,
            dropped: 0,
        }
    }

    /// Offers one event; skips uninterested lanes, drops on overflow.
    fn offer(&mut self, event: &Arc<Event>) {
        if !self.subscriber.wants(event.kind) {
            return;
        }

        if self.queue.try_send(Arc::clone(event)).is_err() {
            self.dropped += 1;
            tracing::warn!(
                subscriber = self.subscriber.name(),
                dropped = self.dropped,
                kind = ?event.kind,
                "subscriber queue full, event dropped"
            );
        }
    }

    /// Seals the queue and waits for the worker to finish what is left.
    async fn close(self) {
        drop(self.queue);
        let _ = self.worker.await;
    }
}

/// Per-subscriber queued fan-out fed from a machine event bus.
pub struct SubscriberSet {
    pump: JoinHandle<()>,
    lanes: usize,
}

impl SubscriberSet {
    /// Subscribes to `bus` and opens one lane per subscriber.
    ///
    /// Must be called from within a Tokio runtime. The pump keeps running
    /// until the bus closes or [`close`](SubscriberSet::close) is called.
    pub fn spawn(bus: &Bus, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        let lanes = subscribers.len();
        let mut feed = bus.subscribe();
        let mut open_lanes: Vec<Lane> = subscribers.into_iter().map(Lane::open).collect();

        let pump = tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(event) => {
                        let event = Arc::new(event);
                        for lane in &mut open_lanes {
                            lane.offer(&event);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event pump lagged behind the bus");
                    }
                }
            }

            for lane in open_lanes {
                lane.close().await;
            }
        });

        Self { pump, lanes }
    }

    /// Number of lanes (one per subscriber).
    pub fn lane_count(&self) -> usize {
        self.lanes
    }

    /// True when no subscriber is attached.
    pub fn is_empty(&self) -> bool {
        self.lanes == 0
    }

    /// Stops the pump early.
    ///
    /// Lane queues close with the pump; each worker finishes whatever was
    /// already queued for it and exits.
    pub fn close(self) {
        self.pump.abort();
    }
}
