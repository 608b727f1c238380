//! # taskmill
//!
//! **Taskmill** is a process-wide task dispatch and lifecycle framework.
//!
//! It provides the machinery behind annotation-style concurrency: an
//! interception layer rewrites annotated procedures into calls on this
//! crate, which owns the worker pools, the periodic and one-shot
//! schedulers, the per-caller thread groups, and the cooperative shutdown
//! protocol. Everything is equally usable without generated code.
//!
//! ## Features
//!
//! | Area | Description | Key types / functions |
//! |---|---|---|
//! | **Dispatch** | Named bounded pools with caller-runs backpressure, plus a cached unbounded pool. | [`TaskMachine`], [`thread_runnable`] |
//! | **Thread groups** | Await everything a caller spawned within a lexical region. | [`begin_thread_group`], [`end_thread_group`] |
//! | **Run once** | At-most-one execution per (instance, call site), weakly keyed. | [`run_once`], [`RunOnceController`] |
//! | **Run on timer** | One repeating timer per (instance, call site); instance held weakly. | [`run_on_timer`], [`TimerController`] |
//! | **Timeouts** | Deadline-bounded execution with cooperative cancellation. | [`with_timeout`], [`TimeoutController`] |
//! | **Shutdown** | Terminal flag, per-pool drain budgets, signal hook, cooperative checks. | [`check_shutdown`], [`TaskMachine::shutdown`] |
//! | **TTL collections** | Entries expire after a fixed time-to-live; sweep-on-access or self-sweeping. | [`TtlCollection`], [`AutoTtlCollection`] |
//! | **Observation** | Per-task veto/failure hooks and a machine event bus with fan-out. | [`TaskEventListener`], [`Subscribe`] |
//!
//! ```no_run
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use taskmill::{
//!     begin_thread_group, check_shutdown, end_thread_group, thread_runnable, TaskFn,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     begin_thread_group()?;
//!
//!     for part in ["north", "south"] {
//!         let task = TaskFn::arc(part, |_ctx: CancellationToken| async move {
//!             for _ in 0..100 {
//!                 check_shutdown()?;
//!                 tokio::time::sleep(Duration::from_millis(10)).await;
//!             }
//!             Ok(())
//!         });
//!         thread_runnable(true, "ingest", true, task).await?;
//!     }
//!
//!     // Both parts run in parallel; this returns when the slower one is
//!     // done.
//!     let finished = end_thread_group(Duration::from_secs(30)).await?;
//!     assert_eq!(finished, 2);
//!     Ok(())
//! }
//! ```
//!
//! ## Lifecycle
//! The process-wide [`machine()`] installs a termination-signal hook on
//! first use; `shutdown` is terminal until [`TaskMachine::reset`].
//! Dispatched bodies receive a cancellation token and should check
//! [`check_shutdown`] (or their token) inside loops — cancellation is
//! cooperative everywhere, nothing is ever killed forcibly.
//!
//! ---

mod callsite;
mod config;
mod controllers;
mod error;
mod events;
mod group;
mod ids;
mod listener;
mod machine;
mod pool;
mod registry;
mod subscribers;
mod tasks;
mod ttl;

// ---- Public re-exports ----

pub use callsite::{
    begin_thread_group, check_shutdown, end_thread_group, machine, run_on_timer, run_once,
    thread_runnable, with_timeout,
};
pub use config::{MachineConfig, PoolConfig};
pub use controllers::{
    run_once_controller, timeout_controller, timer_controller, RunOnceController,
    TimeoutController, TimerController, DEFAULT_TIMER_DELAY, DEFAULT_TIMER_PERIOD,
};
pub use error::{MachineError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use group::{GroupLatch, DEFAULT_GROUP_WAIT};
pub use ids::RollingId;
pub use listener::{DefaultListener, ForwardingListener, TaskContext, TaskEventListener};
pub use machine::TaskMachine;
pub use pool::{Pool, PoolKind, Submission};
pub use registry::{type_site, InstanceKey, InstanceRegistry, SiteKey};
pub use subscribers::{LogSubscriber, Subscribe, SubscriberSet, DEFAULT_LANE_CAPACITY};
pub use tasks::{BoxTaskFuture, Task, TaskFn, TaskHandle, TaskOutcome, TaskRef};
pub use ttl::{AutoTtlCollection, TtlCollection};

/// Renders a caught panic payload into a loggable reason.
pub(crate) fn panic_reason(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
