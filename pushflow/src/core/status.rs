//! Outcome status and acknowledgement action enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The classified result of executing one stage delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Stage completed successfully.
    Success,
    /// Stage failed; redelivering the same stage may succeed.
    RetryableFailure,
    /// Stage failed; redelivery would not help.
    TerminalFailure,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::RetryableFailure => write!(f, "retryable_failure"),
            Self::TerminalFailure => write!(f, "terminal_failure"),
        }
    }
}

impl OutcomeStatus {
    /// Returns true if the status indicates success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !self.is_success()
    }
}

/// What the broker is told to do with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckAction {
    /// Permanently remove the message.
    Ack,
    /// Request redelivery after backoff.
    Nack,
}

impl fmt::Display for AckAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => write!(f, "ack"),
            Self::Nack => write!(f, "nack"),
        }
    }
}
