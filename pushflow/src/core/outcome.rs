//! Stage outcome type with factory methods.

use super::{OutcomeStatus, StageId};
use crate::errors::{ErrorKind, StageExecutionError};
use serde::{Deserialize, Serialize};

/// The outcome of executing one stage delivery.
///
/// Created once per invocation and consumed once by the decision engine.
/// The core never persists outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// The classified status.
    pub status: OutcomeStatus,

    /// Human readable detail or error context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Stage to enqueue next when the run has further stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_stage: Option<StageId>,

    /// Result document produced by the stage, forwarded upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Taxonomy code when the failure was classified by the dispatcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl StageOutcome {
    /// Creates a successful outcome that completes the run.
    #[must_use]
    pub const fn success() -> Self {
        Self {
            status: OutcomeStatus::Success,
            detail: None,
            next_stage: None,
            output: None,
            error_kind: None,
        }
    }

    /// Creates a successful outcome that advances the run to `next`.
    #[must_use]
    pub fn success_then(next: StageId) -> Self {
        Self {
            next_stage: Some(next),
            ..Self::success()
        }
    }

    /// Creates a retryable failure.
    #[must_use]
    pub fn retryable(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::RetryableFailure,
            detail: Some(detail.into()),
            next_stage: None,
            output: None,
            error_kind: None,
        }
    }

    /// Creates a terminal failure.
    #[must_use]
    pub fn terminal(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::TerminalFailure,
            detail: Some(detail.into()),
            next_stage: None,
            output: None,
            error_kind: None,
        }
    }

    /// Converts an executor error into an outcome, keeping its taxonomy code.
    #[must_use]
    pub fn from_error(err: &StageExecutionError) -> Self {
        let outcome = if err.retryable {
            Self::retryable(err.message.clone())
        } else {
            Self::terminal(err.message.clone())
        };
        outcome.with_error_kind(err.kind)
    }

    /// Attaches the stage's result document.
    #[must_use]
    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Attaches a detail message.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attaches a taxonomy code.
    #[must_use]
    pub fn with_error_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if redelivery may help.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.status, OutcomeStatus::RetryableFailure)
    }
}
