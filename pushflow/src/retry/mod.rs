//! Retry and backoff coordination.
//!
//! The broker owns every piece of retry state. This module only turns the
//! attempt metadata it injects into policies, delay hints and run states.

mod backoff;
mod policy;
mod state;

pub use backoff::{BackoffPolicy, BackoffStrategy, DEFAULT_CEILING_MS, DEFAULT_FLOOR_MS};
pub use policy::{PolicyTable, RetryMode, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
pub use state::RunState;
