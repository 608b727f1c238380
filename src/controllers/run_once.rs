//! # Run-once controller.
//!
//! Guarantees at-most-one execution of a body per (instance, site) pair.
//! The catalog is keyed weakly: once an instance is collected, its record
//! vanishes, so a *new* instance of the same declaration runs the body
//! again — the catalog tracks object lifetimes, not types.
//!
//! The whole check-then-run sequence holds one lock, so parallel callers
//! racing on the same pair serialize and exactly one of them runs the body.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::registry::{InstanceKey, InstanceRegistry, SiteKey};

/// At-most-once execution per (instance, site).
pub struct RunOnceController {
    catalog: Mutex<InstanceRegistry<SiteKey, ()>>,
}

impl RunOnceController {
    /// Creates an empty controller.
    pub fn new() -> Self {
        Self {
            catalog: Mutex::new(InstanceRegistry::new()),
        }
    }

    /// Runs `body` iff (instance, site) has never executed before.
    ///
    /// Returns `true` when the body ran. The catalog lock is held across
    /// the body, so concurrent invocations for the same pair cannot both
    /// observe "not yet run". A body that panics still counts as run.
    pub async fn execute_and_catalog<T, F, Fut>(
        &self,
        instance: &Arc<T>,
        site: SiteKey,
        body: F,
    ) -> bool
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut catalog = self.catalog.lock().await;

        if catalog.check_and_add(InstanceKey::of(instance), site, ()) {
            body().await;
            return true;
        }

        false
    }

    /// Number of live instances with at least one recorded execution.
    pub async fn tracked_instances(&self) -> usize {
        self.catalog.lock().await.instance_count()
    }
}

impl Default for RunOnceController {
    fn default() -> Self {
        Self::new()
    }
}
