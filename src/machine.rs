//! # TaskMachine: process-wide dispatch, pools, groups, and shutdown.
//!
//! The [`TaskMachine`] is the central entry point the interception layer
//! calls. It owns the worker pools (a cached unbounded pool created
//! eagerly, named bounded pools created lazily), the group latch, the
//! swappable per-task event listener, and the shutdown protocol.
//!
//! ## Architecture
//! ```text
//! execute_in_thread(poolable, pool, groupable, task)
//!       │
//!       ├──► resolve pool (lazy create under the pool-map lock)
//!       ├──► wrap task: before_task ─► body ─► after_task / on_exception
//!       ├──► submit (caller-runs when the bounded queue is saturated)
//!       └──► groupable + active group? ─► register handle with the latch
//!
//! shutdown(wait)
//!       ├──► set the flag (every entry point now refuses work)
//!       ├──► seal every pool, then await each with wait ÷ pool-count
//!       ├──► force down pools that miss their budget
//!       └──► release the caller's thread groups
//! ```
//!
//! ## Lifecycle rules
//! - The machine is built once and lives for the process; the singleton
//!   accessor installs a termination-signal hook that runs
//!   `shutdown(grace)`.
//! - `shutdown` is terminal and idempotent; `reset` is only legal while
//!   shut down and re-seeds the pool map with a fresh cached pool.
//! - The cooperative shutdown check ([`check_shutdown`]
//!   [`TaskMachine::check_shutdown`]) is the primary cancellation
//!   mechanism for dispatched bodies; forced pool teardown cancels tokens
//!   as a backstop.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::sync::Mutex;

use crate::config::MachineConfig;
use crate::error::{MachineError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::group::GroupLatch;
use crate::listener::{DefaultListener, TaskContext, TaskEventListener};
use crate::pool::{Pool, Submission};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::tasks::{TaskHandle, TaskRef};

/// Pool map plus the sentinel id of the cached unbounded pool.
struct PoolMap {
    pools: HashMap<String, Arc<Pool>>,
    cached_id: String,
}

impl PoolMap {
    fn seed(cfg: &MachineConfig) -> Self {
        // Random sentinel so no user-chosen pool name can collide with it.
        let cached_id = format!("cachedpool#{:016x}", rand::random::<u64>());
        let mut pools = HashMap::new();
        pools.insert(cached_id.clone(), Pool::cached(cfg.pool.idle_ttl));
        Self { pools, cached_id }
    }
}

/// Process-wide thread machinery: pools, groups, listener, shutdown.
pub struct TaskMachine {
    cfg: MachineConfig,
    shutdown: AtomicBool,
    pools: Mutex<PoolMap>,
    latch: GroupLatch,
    listener: RwLock<Arc<dyn TaskEventListener>>,
    bus: Bus,
    subscribers: Option<SubscriberSet>,
}

impl TaskMachine {
    /// Creates a machine with the given configuration and subscribers.
    ///
    /// Subscribers are driven off the machine's event bus through a
    /// non-blocking fan-out; pass an empty vector to run unobserved.
    /// Requires a Tokio runtime when `subscribers` is non-empty.
    pub fn new(cfg: MachineConfig, subscribers: Vec<Arc<dyn Subscribe>>) -> Arc<Self> {
        let bus = Bus::new(cfg.bus_capacity);
        let pools = Mutex::new(PoolMap::seed(&cfg));

        let subscribers = if subscribers.is_empty() {
            None
        } else {
            Some(SubscriberSet::spawn(&bus, subscribers))
        };

        Arc::new(Self {
            cfg,
            shutdown: AtomicBool::new(false),
            pools,
            latch: GroupLatch::new(),
            listener: RwLock::new(Arc::new(DefaultListener)),
            bus,
            subscribers,
        })
    }

    /// Installs the termination-signal hook: when the process is told to
    /// die, the machine shuts down with the configured grace.
    ///
    /// Failures inside the hook are logged and swallowed. Outside a Tokio
    /// runtime the hook cannot be installed; a warning is logged instead,
    /// and the embedder is expected to call
    /// [`shutdown`](TaskMachine::shutdown) itself.
    pub fn install_signal_hook(self: &Arc<Self>) {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("no runtime available, termination-signal hook not installed");
            return;
        }

        let machine = Arc::clone(self);
        tokio::spawn(async move {
            match termination_signal().await {
                Ok(signal) => {
                    tracing::info!(
                        signal,
                        grace = ?machine.cfg.shutdown_grace,
                        "termination signal received, draining pools"
                    );
                    if let Err(error) = machine.shutdown(machine.cfg.shutdown_grace).await {
                        tracing::error!(%error, "signal-driven shutdown failed");
                    }
                }
                Err(error) => {
                    // The machine runs unguarded: nothing will drain the
                    // pools on process exit.
                    tracing::error!(%error, "termination-signal registration failed");
                }
            }
        });
    }

    /// The machine's configuration.
    pub fn config(&self) -> &MachineConfig {
        &self.cfg
    }

    /// Checks the shutdown flag.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// The cooperative shutdown check.
    ///
    /// The interception layer injects this at statement boundaries of
    /// thread-managed bodies (and at explicitly marked points); a body
    /// that propagates the error with `?` unwinds promptly once shutdown
    /// starts.
    pub fn check_shutdown(&self) -> Result<(), TaskError> {
        if self.is_shutdown() {
            return Err(TaskError::Shutdown);
        }
        Ok(())
    }

    /// Subscribes to machine events (pool lifecycle, dispatch, shutdown
    /// milestones).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Replaces the per-task event listener; `None` restores the default.
    ///
    /// The new listener applies to tasks dispatched after the call.
    pub fn set_listener(&self, listener: Option<Arc<dyn TaskEventListener>>) {
        let listener = listener.unwrap_or_else(|| Arc::new(DefaultListener));
        *self
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = listener;
    }

    /// The current per-task event listener.
    pub fn listener(&self) -> Arc<dyn TaskEventListener> {
        Arc::clone(&self.listener.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Dispatches `task` into a pool.
    ///
    /// - `poolable` selects a named bounded pool (created lazily on first
    ///   use); otherwise the cached unbounded pool runs the task.
    /// - `groupable` registers the handle with the caller's top thread
    ///   group — when one exists; without a group the task just runs free.
    ///
    /// The returned handle observes the task's outcome and can cancel it.
    /// When the bounded queue is saturated the task runs inline on the
    /// caller before this method returns (backpressure).
    pub async fn execute_in_thread(
        &self,
        poolable: bool,
        pool_name: &str,
        groupable: bool,
        task: TaskRef,
    ) -> Result<TaskHandle, MachineError> {
        if self.is_shutdown() {
            return Err(MachineError::ShutdownActive);
        }

        let pool = if poolable {
            self.get_or_create_pool(pool_name).await?
        } else {
            self.cached_pool().await
        };

        let token = pool.cancel_token().child_token();
        let (handle, job) = self.wrap(&task, pool.name(), token);

        let submission = pool.submit(job).await?;

        let kind = match submission {
            Submission::Dispatched => EventKind::TaskSubmitted,
            Submission::CallerRan => EventKind::CallerRan,
        };
        self.bus.publish(
            Event::now(kind)
                .with_pool(pool.name())
                .with_task(task.name()),
        );

        if groupable && self.latch.has_groups() {
            // has_groups was just observed true for this context, so the
            // add cannot miss.
            let _ = self.latch.add_to_group(handle.clone());
        }

        Ok(handle)
    }

    /// Opens a new thread group for the current caller context.
    pub fn create_thread_group(&self) -> Result<(), MachineError> {
        if self.is_shutdown() {
            return Err(MachineError::ShutdownActive);
        }
        self.latch.create_group();
        Ok(())
    }

    /// Waits for the current context's top thread group.
    ///
    /// Returns the number of handles that completed. Timeouts surface as
    /// [`TaskError::Timeout`] carrying the per-handle wait; a task that
    /// ended on the shutdown signal re-raises [`TaskError::Shutdown`].
    pub async fn await_current_thread_group(&self, timeout: Duration) -> Result<usize, TaskError> {
        self.latch.wait_for_finish(timeout).await
    }

    /// Discards the current context's thread groups without cancelling
    /// their tasks. Returns the number of handles released.
    pub fn release_thread_groups(&self) -> usize {
        self.latch.release_all()
    }

    /// Number of open groups in the current caller context.
    pub fn thread_group_count(&self) -> usize {
        self.latch.group_count()
    }

    /// Total handles across the current caller context's groups.
    pub fn grouped_thread_count(&self) -> usize {
        self.latch.handle_count()
    }

    /// Shuts the machine down, draining every pool within `wait`.
    ///
    /// Idempotent: once the flag is set, later calls return immediately.
    /// Every pool is sealed before any is awaited; the wait budget is
    /// divided evenly across pools and a pool that misses its share is
    /// forced down (its running bodies observe cancellation, its queued
    /// work is abandoned). Finally the caller's thread groups are
    /// released.
    pub async fn shutdown(&self, wait: Duration) -> Result<(), MachineError> {
        if self.is_shutdown() {
            return Ok(());
        }

        let pools = self.pools.lock().await;

        // Check again: another caller may have won the race to the lock.
        if self.is_shutdown() {
            return Ok(());
        }
        if wait.is_zero() {
            return Err(MachineError::ZeroWait);
        }

        self.shutdown.store(true, Ordering::SeqCst);
        self.bus
            .publish(Event::now(EventKind::ShutdownRequested).with_timeout(wait));

        // The pool count is stable here: creation happens under this lock
        // and refuses once the flag is set.
        let budget = (wait / pools.pools.len().max(1) as u32).max(Duration::from_millis(1));

        for pool in pools.pools.values() {
            pool.seal().await;
        }

        let mut all_drained = true;
        for pool in pools.pools.values() {
            if pool.await_idle(budget).await {
                self.bus
                    .publish(Event::now(EventKind::PoolDrained).with_pool(pool.name()));
            } else {
                all_drained = false;
                pool.force_down().await;
                self.bus.publish(
                    Event::now(EventKind::PoolForcedDown)
                        .with_pool(pool.name())
                        .with_timeout(budget),
                );
                tracing::warn!(pool = pool.name(), ?budget, "pool missed its shutdown budget");
            }
        }

        self.bus.publish(Event::now(if all_drained {
            EventKind::AllStoppedWithin
        } else {
            EventKind::GraceExceeded
        }));

        drop(pools);

        let released = self.latch.release_all();
        if released > 0 {
            tracing::debug!(released, "released thread-group handles at shutdown");
        }

        Ok(())
    }

    /// Re-initializes the machine after a shutdown.
    ///
    /// Clears the flag and re-seeds the pool map with a fresh cached
    /// unbounded pool. Illegal while the machine is running.
    pub async fn reset(&self) -> Result<(), MachineError> {
        let mut pools = self.pools.lock().await;

        if !self.is_shutdown() {
            return Err(MachineError::NotShutdown);
        }

        self.shutdown.store(false, Ordering::SeqCst);
        *pools = PoolMap::seed(&self.cfg);
        self.bus.publish(Event::now(EventKind::MachineReset));

        Ok(())
    }

    /// Resolves a named bounded pool, creating it on first use.
    async fn get_or_create_pool(&self, pool_name: &str) -> Result<Arc<Pool>, MachineError> {
        if pool_name.trim().is_empty() {
            return Err(MachineError::EmptyPoolName);
        }

        let mut pools = self.pools.lock().await;

        // Re-check under the lock: a racing caller may have created it.
        if let Some(pool) = pools.pools.get(pool_name) {
            self.bus
                .publish(Event::now(EventKind::PoolResolved).with_pool(pool_name));
            return Ok(Arc::clone(pool));
        }

        self.bus
            .publish(Event::now(EventKind::PoolCreating).with_pool(pool_name));
        let pool = Pool::bounded(&self.cfg.pool);
        pools.pools.insert(pool_name.to_string(), Arc::clone(&pool));
        self.bus
            .publish(Event::now(EventKind::PoolCreated).with_pool(pool_name));

        Ok(pool)
    }

    /// The cached unbounded pool.
    async fn cached_pool(&self) -> Arc<Pool> {
        let mut pools = self.pools.lock().await;

        if let Some(pool) = pools.pools.get(&pools.cached_id) {
            return Arc::clone(pool);
        }

        // Only reachable if something removed the sentinel entry; restore
        // it rather than failing the dispatch.
        let pool = Pool::cached(self.cfg.pool.idle_ttl);
        let cached_id = pools.cached_id.clone();
        pools.pools.insert(cached_id, Arc::clone(&pool));
        pool
    }

    /// Wraps a task with the listener hooks, panic isolation, and outcome
    /// reporting, yielding the handle and the pool-ready job.
    fn wrap(
        &self,
        task: &TaskRef,
        pool_name: &str,
        token: tokio_util::sync::CancellationToken,
    ) -> (TaskHandle, crate::pool::Job) {
        let context = TaskContext {
            name: task.name().to_string(),
            pool: pool_name.to_string(),
        };
        let listener = self.listener();
        let bus = self.bus.clone();

        let (outcome_tx, handle) = TaskHandle::channel(task.name(), token.clone());
        let body = task.run(token);

        let job: crate::pool::Job = Box::pin(async move {
            if !listener.before_task(&context) {
                bus.publish(Event::now(EventKind::TaskVetoed).with_task(&context.name));
                let _ = outcome_tx.send(Some(Ok(())));
                return;
            }

            let outcome = match AssertUnwindSafe(body).catch_unwind().await {
                Ok(Ok(())) => {
                    listener.after_task(&context);
                    Ok(())
                }
                Ok(Err(error)) => Self::surface(&listener, &context, error),
                Err(panic) => {
                    let error = TaskError::failed(crate::panic_reason(&panic));
                    Self::surface(&listener, &context, error)
                }
            };

            match &outcome {
                Ok(()) => {
                    bus.publish(Event::now(EventKind::TaskStopped).with_task(&context.name));
                }
                Err(error) => {
                    bus.publish(
                        Event::now(EventKind::TaskFailed)
                            .with_task(&context.name)
                            .with_error(error.to_string()),
                    );
                }
            }

            let _ = outcome_tx.send(Some(outcome));
        });

        (handle, job)
    }

    /// Feeds a failure through `on_exception` and the default failure
    /// pathway.
    fn surface(
        listener: &Arc<dyn TaskEventListener>,
        context: &TaskContext,
        error: TaskError,
    ) -> Result<(), TaskError> {
        match listener.on_exception(context, error) {
            // The listener terminated propagation; the run counts as
            // complete but after_task is not invoked.
            None => Ok(()),
            Some(surfaced) => Err(surfaced),
        }
    }

    /// Number of subscriber lanes attached to the machine's bus.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .as_ref()
            .map_or(0, SubscriberSet::lane_count)
    }
}

/// Resolves when the process is told to terminate, reporting which signal
/// arrived.
///
/// Every termination signal means the same thing to the machine — drain
/// the pools within the configured grace — so the listeners race and the
/// first one to fire wins. Registration failures surface to the hook,
/// which logs that the machine is running unguarded.
#[cfg(unix)]
async fn termination_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut streams = Vec::new();
    for (name, kind) in [
        ("SIGINT", SignalKind::interrupt()),
        ("SIGTERM", SignalKind::terminate()),
        ("SIGQUIT", SignalKind::quit()),
    ] {
        streams.push((name, signal(kind)?));
    }

    let races = streams.iter_mut().map(|(name, stream)| {
        let name: &'static str = *name;
        Box::pin(async move {
            stream.recv().await;
            name
        })
    });

    let (name, _winner, _rest) = futures::future::select_all(races).await;
    Ok(name)
}

/// Resolves when the process is told to terminate.
///
/// Off unix the only portable termination notice is Ctrl-C.
#[cfg(not(unix))]
async fn termination_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
}
