//! # Call-site entry points.
//!
//! The free functions in this module are the contract an interception
//! layer (a macro or code-generation pass rewriting annotated procedures)
//! targets. They delegate to the process-wide machine and controllers, so
//! generated code needs exactly one call per annotated site:
//!
//! | Annotation intent | Injected call |
//! |---|---|
//! | run once per instance | [`run_once`] |
//! | run periodically | [`run_on_timer`] |
//! | bounded execution time | [`with_timeout`] |
//! | run on a managed pool | [`thread_runnable`] |
//! | group boundary | [`begin_thread_group`] / [`end_thread_group`] |
//! | cooperative cancellation point | [`check_shutdown`] |
//!
//! For thread-managed bodies the interception layer is also expected to
//! inject [`check_shutdown`] at statement boundaries (unless disabled at
//! the site), which is what makes machine shutdown reach long loops.
//!
//! Everything here is equally usable by hand; nothing requires generated
//! code.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::controllers::{run_once_controller, timeout_controller, timer_controller};
use crate::error::{MachineError, TaskError};
use crate::machine::TaskMachine;
use crate::registry::SiteKey;
use crate::tasks::{TaskHandle, TaskRef};
use crate::MachineConfig;
use tokio_util::sync::CancellationToken;

static MACHINE: OnceLock<Arc<TaskMachine>> = OnceLock::new();

/// The process-wide task machine.
///
/// Built with defaults on first access; the first call also installs the
/// termination-signal hook (when a runtime is available). The instance is
/// permanent — after a `shutdown`, `reset` brings the same instance back.
pub fn machine() -> &'static Arc<TaskMachine> {
    MACHINE.get_or_init(|| {
        let machine = TaskMachine::new(MachineConfig::default(), Vec::new());
        machine.install_signal_hook();
        machine
    })
}

/// Runs `body` at most once per (instance, site).
///
/// Returns `true` when the body ran. Dropping the instance forgets the
/// record: a new instance of the same declaration runs again.
pub async fn run_once<T, F, Fut>(instance: &Arc<T>, site: SiteKey, body: F) -> bool
where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    run_once_controller()
        .execute_and_catalog(instance, site, body)
        .await
}

/// Schedules `body` to fire for (instance, site): first after `delay`,
/// then every `period`.
///
/// The instance is captured **weakly**: the timer never keeps it alive,
/// skips a fire that races its death, and terminates once it is gone.
/// A repeat call for a live pair runs `body` inline on the caller and
/// returns `Ok(false)`; `Ok(true)` means newly scheduled.
///
/// For a static (type-level) declaration, pass a process-lived instance
/// and derive the site with [`type_site`](crate::registry::type_site).
pub async fn run_on_timer<T, F, Fut>(
    instance: &Arc<T>,
    site: SiteKey,
    delay: Duration,
    period: Duration,
    body: F,
) -> Result<bool, MachineError>
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    let weak = Arc::downgrade(instance);
    let body = Arc::new(body);

    let callback = move || {
        let weak = weak.clone();
        let body = Arc::clone(&body);
        async move {
            if let Some(instance) = weak.upgrade() {
                body(instance).await;
            }
        }
    };

    timer_controller()
        .add(instance, site, delay, period, callback)
        .await
}

/// Runs `body` under a wall-clock deadline.
///
/// On expiry the body's token is cancelled and `Err(TaskError::Timeout)`
/// is returned; the body keeps running until it observes the token.
pub async fn with_timeout<F, Fut>(body: F, timeout: Duration) -> Result<(), TaskError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    timeout_controller().execute(body, timeout).await
}

/// Dispatches `task` through the machine.
///
/// `poolable` selects the named bounded pool (created on first use);
/// otherwise the cached unbounded pool. `groupable` registers the handle
/// with the caller's open thread group, when one exists.
pub async fn thread_runnable(
    poolable: bool,
    pool_name: &str,
    groupable: bool,
    task: TaskRef,
) -> Result<TaskHandle, MachineError> {
    machine()
        .execute_in_thread(poolable, pool_name, groupable, task)
        .await
}

/// Opens a thread group for the current caller context.
pub fn begin_thread_group() -> Result<(), MachineError> {
    machine().create_thread_group()
}

/// Closes the current context's innermost thread group, waiting for each
/// of its tasks up to `timeout`.
///
/// Returns the number of tasks that completed.
pub async fn end_thread_group(timeout: Duration) -> Result<usize, TaskError> {
    machine().await_current_thread_group(timeout).await
}

/// The cooperative shutdown check.
///
/// Fails with [`TaskError::Shutdown`] once machine shutdown has started;
/// bodies propagate it with `?` to unwind promptly.
pub fn check_shutdown() -> Result<(), TaskError> {
    machine().check_shutdown()
}
