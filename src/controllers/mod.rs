//! # Execution controllers: run-once, periodic timer, and bounded timeout.

mod run_once;
mod singletons;
mod timeout;
mod timer;

pub use run_once::RunOnceController;
pub use singletons::{run_once_controller, timeout_controller, timer_controller};
pub use timeout::TimeoutController;
pub use timer::{TimerController, DEFAULT_TIMER_DELAY, DEFAULT_TIMER_PERIOD};
