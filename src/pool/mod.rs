//! # Worker pools: bounded with caller-runs backpressure, and cached
//! unbounded.

mod pool;

pub(crate) use pool::Job;
pub use pool::{Pool, PoolKind, Submission};
