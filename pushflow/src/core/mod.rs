//! Core domain model types for pushflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage identifiers
//! - Work items decoded from deliveries
//! - Stage outcomes and their status
//! - Acknowledgement verdicts

mod outcome;
mod stage;
mod status;
mod verdict;
mod work_item;

pub use outcome::StageOutcome;
pub use stage::StageId;
pub use status::{AckAction, OutcomeStatus};
pub use verdict::{FollowUp, Verdict, VerdictReason};
pub use work_item::{Payload, WorkItem, CONTENT_TYPE_BYTES, CONTENT_TYPE_JSON};
