//! # Event bus for broadcasting machine events.
//!
//! [`Bus`] is a wrapper around [`tokio::sync::broadcast`] that lets the task
//! machine broadcast [`Event`]s to any number of subscribers.
//!
//! - **Broadcast semantics**: all active subscribers receive a clone of each
//!   event.
//! - **Non-persistent**: events published with no subscribers are dropped
//!   silently; the machine operates fine unobserved.
//! - **Bounded capacity**: the oldest buffered events are dropped when the
//!   channel is full.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for machine events.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event to all active subscribers.
    ///
    /// Non-blocking; with no subscribers the event is dropped silently.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
