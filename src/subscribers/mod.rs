//! # Event subscribers: non-blocking observation of machine events.

mod log;
mod set;
mod subscribe;

pub use log::LogSubscriber;
pub use set::{SubscriberSet, DEFAULT_LANE_CAPACITY};
pub use subscribe::Subscribe;
