//! # Process-wide controller instances.
//!
//! The interception layer targets one controller of each kind per process;
//! these accessors lazily initialize and hand out those instances. The
//! instances live for the life of the process — their catalogs are weakly
//! keyed, so they do not accumulate garbage.

use std::sync::OnceLock;

use super::{RunOnceController, TimeoutController, TimerController};

static RUN_ONCE: OnceLock<RunOnceController> = OnceLock::new();
static TIMER: OnceLock<TimerController> = OnceLock::new();
static TIMEOUT: OnceLock<TimeoutController> = OnceLock::new();

/// The process-wide run-once controller.
pub fn run_once_controller() -> &'static RunOnceController {
    RUN_ONCE.get_or_init(RunOnceController::new)
}

/// The process-wide periodic-timer controller.
pub fn timer_controller() -> &'static TimerController {
    TIMER.get_or_init(TimerController::new)
}

/// The process-wide timeout controller.
pub fn timeout_controller() -> &'static TimeoutController {
    TIMEOUT.get_or_init(TimeoutController::new)
}
