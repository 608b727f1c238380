//! # Periodic-timer controller.
//!
//! Binds (instance, site) to a repeating timer task. The first `add` for a
//! pair schedules the callback: first fire after `delay`, then every
//! `period` (fixed-delay semantics: a slow callback pushes the next fire
//! out rather than letting ticks pile up). A repeat `add` for a live pair
//! runs the callback **inline on the caller** instead of scheduling a
//! second fire — the returned boolean tells the two apart (`true` = newly
//! scheduled, `false` = ran inline).
//!
//! Fault policy differs by path: inline runs propagate panics to the
//! caller, while faults inside the timer are caught and logged — a tick
//! must never kill the timer.
//!
//! Two mechanisms stop a timer whose instance died:
//! - the registry drops the binding on its next sweep, and the binding's
//!   drop guard cancels the timer token;
//! - the timer itself checks the instance's liveness before each fire and
//!   self-terminates when it is gone.
//!
//! So a dead instance stops ticking within one period even if the registry
//! is never touched again.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::MachineError;
use crate::registry::{InstanceKey, InstanceRegistry, SiteKey};

/// Default fire interval.
pub const DEFAULT_TIMER_PERIOD: Duration = Duration::from_millis(1000);

/// Default delay before the first fire.
pub const DEFAULT_TIMER_DELAY: Duration = Duration::ZERO;

/// A scheduled timer; dropping it cancels the timer task.
struct TimerBinding {
    _cancel_on_drop: DropGuard,
}

/// One repeating timer per live (instance, site) pair.
pub struct TimerController {
    bindings: Mutex<InstanceRegistry<SiteKey, TimerBinding>>,
}

impl TimerController {
    /// Creates an empty controller.
    pub fn new() -> Self {
        Self {
            bindings: Mutex::new(InstanceRegistry::new()),
        }
    }

    /// Schedules `callback` for (instance, site), or runs it inline when
    /// the pair is already bound.
    ///
    /// Returns `Ok(true)` when a timer was newly scheduled and `Ok(false)`
    /// when the callback ran inline. Rejects a zero `period`; any `delay`
    /// (including zero) is accepted.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn add<T, F, Fut>(
        &self,
        instance: &Arc<T>,
        site: SiteKey,
        delay: Duration,
        period: Duration,
        callback: F,
    ) -> Result<bool, MachineError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        if period.is_zero() {
            return Err(MachineError::ZeroPeriod);
        }

        let mut bindings = self.bindings.lock().await;
        let key = InstanceKey::of(instance);

        if bindings.contains(&key, &site) {
            // Already bound: run now, on the caller, faults and all.
            callback().await;
            return Ok(false);
        }

        let token = CancellationToken::new();
        let liveness = key.clone();
        let timer_token = token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = timer_token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = timer_token.cancelled() => return,
                    _ = ticks.tick() => {}
                }

                if !liveness.is_live() {
                    tracing::debug!(site = %site, "timer instance collected, stopping");
                    return;
                }

                if let Err(fault) = AssertUnwindSafe(callback()).catch_unwind().await {
                    let reason = crate::panic_reason(&fault);
                    tracing::error!(site = %site, %reason, "timer tick faulted; timer kept alive");
                }
            }
        });

        bindings.add(
            key,
            site,
            TimerBinding {
                _cancel_on_drop: token.drop_guard(),
            },
        );

        Ok(true)
    }

    /// True while (instance, site) has a live binding.
    pub async fn is_bound<T: Send + Sync + 'static>(
        &self,
        instance: &Arc<T>,
        site: SiteKey,
    ) -> bool {
        self.bindings
            .lock()
            .await
            .contains(&InstanceKey::of(instance), &site)
    }

    /// Number of live instances with at least one timer.
    pub async fn tracked_instances(&self) -> usize {
        self.bindings.lock().await.instance_count()
    }
}

impl Default for TimerController {
    fn default() -> Self {
        Self::new()
    }
}
