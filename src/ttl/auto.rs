//! # Self-sweeping time-to-live collection.
//!
//! [`AutoTtlCollection`] behaves like [`TtlCollection`] but additionally
//! registers a periodic sweep with the process-wide timer controller at
//! construction, firing once per time-to-live. The collection therefore
//! shrinks on its own — no reader activity required.
//!
//! The timer holds the collection **weakly**: dropping the last `Arc`
//! leaves nothing keeping the collection alive, and the sweep timer
//! self-terminates on its next fire.

use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::controllers::timer_controller;
use crate::error::MachineError;
use crate::registry::SiteKey;
use crate::ttl::TtlCollection;

const SWEEP_SITE: SiteKey = SiteKey::new("auto-ttl-sweep");

/// Time-to-live collection with a background sweep at interval = ttl.
pub struct AutoTtlCollection<T> {
    inner: TtlCollection<T>,
}

impl<T> AutoTtlCollection<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    /// Creates the collection and schedules its sweep.
    ///
    /// Must be called from within a Tokio runtime (the sweep is a timer
    /// task).
    pub async fn new(ttl: Duration) -> Result<Arc<Self>, MachineError> {
        Self::build(TtlCollection::new(ttl)?).await
    }

    /// Creates the collection with an expiration hook and schedules its
    /// sweep.
    pub async fn with_expiration_hook(
        ttl: Duration,
        hook: impl Fn(&T) + Send + Sync + 'static,
    ) -> Result<Arc<Self>, MachineError> {
        Self::build(TtlCollection::with_expiration_hook(ttl, hook)?).await
    }

    async fn build(inner: TtlCollection<T>) -> Result<Arc<Self>, MachineError> {
        let ttl = inner.ttl();
        let collection = Arc::new(Self { inner });

        let sweeper: Weak<Self> = Arc::downgrade(&collection);
        timer_controller()
            .add(&collection, SWEEP_SITE, ttl, ttl, move || {
                let sweeper = sweeper.clone();
                async move {
                    if let Some(collection) = sweeper.upgrade() {
                        collection.drain_expired();
                    }
                }
            })
            .await?;

        Ok(collection)
    }
}

impl<T> Deref for AutoTtlCollection<T> {
    type Target = TtlCollection<T>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
