//! Testing utilities for pushflow coordinators.
//!
//! This module provides:
//! - Mock stage executors
//! - Push body builders and a wired coordinator harness
//! - Verdict assertions

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_abandoned, assert_ack, assert_advances_to, assert_nack_within};
pub use fixtures::{PushBody, TestHarness};
pub use mocks::{
    FailingExecutor, MockExecutor, PanickingExecutor, RecordingExecutor, SlowExecutor,
};
