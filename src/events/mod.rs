//! # Machine events: pool lifecycle, dispatch, and shutdown milestones.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
