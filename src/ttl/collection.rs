//! # Time-to-live collection.
//!
//! [`TtlCollection`] holds payloads that expire a fixed duration after
//! insertion. Every public operation except [`clear`](TtlCollection::clear)
//! first drains expired entries — polling them in deadline order and
//! handing each expired payload to the expiration hook — so no read ever
//! observes a stale entry.
//!
//! Membership and removal go by **payload equality**, not by entry
//! identity: removing a payload removes the oldest equal entry regardless
//! of when it was inserted.
//!
//! The time-to-live is fixed per collection, so deadlines are monotone in
//! insertion order and the container is simply a deadline-ordered deque.
//!
//! This type is thread safe.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::MachineError;

struct Entry<T> {
    payload: T,
    deadline: Instant,
}

/// Collection whose entries expire `ttl` after insertion.
pub struct TtlCollection<T> {
    ttl: Duration,
    entries: Mutex<VecDeque<Entry<T>>>,
    on_expiration: Option<Box<dyn Fn(&T) + Send + Sync>>,
}

impl<T: PartialEq> TtlCollection<T> {
    /// Creates a collection with the given time-to-live.
    ///
    /// A zero `ttl` is rejected: every entry would be born expired.
    pub fn new(ttl: Duration) -> Result<Self, MachineError> {
        if ttl.is_zero() {
            return Err(MachineError::ZeroTtl);
        }
        Ok(Self {
            ttl,
            entries: Mutex::new(VecDeque::new()),
            on_expiration: None,
        })
    }

    /// Creates a collection that passes each expired payload to `hook`.
    ///
    /// The hook runs outside the collection lock, so it may touch the
    /// collection again.
    pub fn with_expiration_hook(
        ttl: Duration,
        hook: impl Fn(&T) + Send + Sync + 'static,
    ) -> Result<Self, MachineError> {
        let mut collection = Self::new(ttl)?;
        collection.on_expiration = Some(Box::new(hook));
        Ok(collection)
    }

    /// The configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Entry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drains expired entries, invoking the expiration hook per payload in
    /// deadline order. Returns the number removed.
    pub fn drain_expired(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        {
            let mut entries = self.lock();
            while entries.front().is_some_and(|e| e.deadline <= now) {
                if let Some(entry) = entries.pop_front() {
                    expired.push(entry.payload);
                }
            }
        }

        if let Some(hook) = &self.on_expiration {
            for payload in &expired {
                hook(payload);
            }
        }

        expired.len()
    }

    /// Inserts a payload with deadline `now + ttl`.
    pub fn add(&self, payload: T) {
        self.drain_expired();
        let deadline = Instant::now() + self.ttl;
        self.lock().push_back(Entry { payload, deadline });
    }

    /// Removes the oldest entry equal to `payload`.
    ///
    /// Returns `true` when an entry was removed.
    pub fn remove(&self, payload: &T) -> bool {
        self.drain_expired();
        let mut entries = self.lock();
        match entries.iter().position(|e| e.payload == *payload) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// True when an unexpired entry equals `payload`.
    pub fn contains(&self, payload: &T) -> bool {
        self.drain_expired();
        self.lock().iter().any(|e| e.payload == *payload)
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        self.drain_expired();
        self.lock().len()
    }

    /// True when no unexpired entry remains.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry without expiring anything; the hook is not
    /// invoked.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl<T: PartialEq + Clone> TtlCollection<T> {
    /// Unexpired payloads in deadline order.
    pub fn snapshot(&self) -> Vec<T> {
        self.drain_expired();
        self.lock().iter().map(|e| e.payload.clone()).collect()
    }
}
