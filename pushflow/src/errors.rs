//! Error types for the pushflow coordinator.
//!
//! The taxonomy here is what every failure is eventually classified into
//! before a verdict is produced. Nothing in this module ever reaches the
//! transport layer directly: the dispatcher and coordinator convert errors
//! into stage outcomes or verdicts first.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Classification code attached to every failure the core handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Inbound delivery could not be parsed. Always terminal.
    MalformedEnvelope,
    /// Raised by a stage executor; retryability is set by the executor.
    StageExecution,
    /// No executor is registered for the stage. Terminal, pages an operator.
    UnknownStage,
    /// Execution exceeded the acknowledgement budget. Retryable.
    DeadlineExceeded,
    /// The executor panicked. Treated as an unexpected runtime fault.
    ExecutorPanic,
    /// The follow-up work item could not be handed to the broker.
    EnqueueFailed,
}

impl ErrorKind {
    /// Returns the wire/log code for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope => "malformed_envelope",
            Self::StageExecution => "stage_execution",
            Self::UnknownStage => "unknown_stage",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::ExecutorPanic => "executor_panic",
            Self::EnqueueFailed => "enqueue_failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised while decoding an inbound push delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The body, its attributes or its payload could not be parsed.
    #[error("Malformed envelope: {reason}")]
    Malformed {
        /// What was wrong with the delivery.
        reason: String,
    },

    /// The delivery names a stage nobody registered.
    #[error("Unknown stage '{stage}'")]
    UnknownStage {
        /// The stage name as it appeared on the wire.
        stage: String,
    },
}

impl EnvelopeError {
    /// Creates a malformed envelope error.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Creates an unknown stage error.
    #[must_use]
    pub fn unknown_stage(stage: impl Into<String>) -> Self {
        Self::UnknownStage {
            stage: stage.into(),
        }
    }

    /// Returns the taxonomy code for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Malformed { .. } => ErrorKind::MalformedEnvelope,
            Self::UnknownStage { .. } => ErrorKind::UnknownStage,
        }
    }
}

/// Error returned by a stage executor.
///
/// The executor decides whether redelivery could help by setting
/// `retryable`. The dispatcher also builds these for timeouts and panics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stage execution error: {message}")]
pub struct StageExecutionError {
    /// Human readable failure description.
    pub message: String,
    /// Whether a redelivery of the same stage may succeed.
    pub retryable: bool,
    /// Taxonomy code.
    pub kind: ErrorKind,
}

impl StageExecutionError {
    /// Creates a transient error; redelivery may succeed.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            kind: ErrorKind::StageExecution,
        }
    }

    /// Creates a fatal error; redelivery would not help.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            kind: ErrorKind::StageExecution,
        }
    }

    /// Creates a deadline exceeded error for an execution budget.
    #[must_use]
    pub fn deadline_exceeded(stage: impl fmt::Display, budget: Duration) -> Self {
        Self {
            message: format!(
                "stage '{stage}' exceeded its execution budget of {}ms",
                budget.as_millis()
            ),
            retryable: true,
            kind: ErrorKind::DeadlineExceeded,
        }
    }

    /// Creates an error for an executor that panicked.
    #[must_use]
    pub fn panicked(stage: impl fmt::Display, message: impl Into<String>) -> Self {
        Self {
            message: format!("stage '{stage}' panicked: {}", message.into()),
            retryable: true,
            kind: ErrorKind::ExecutorPanic,
        }
    }
}

/// Error raised when a follow-up work item cannot be handed to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// No destination is configured for the stage.
    #[error("No publish target configured for stage '{0}'")]
    NoRoute(String),

    /// The broker answered with a non-success status.
    #[error("Publish rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The request never completed.
    #[error("Publish transport error: {0}")]
    Transport(String),
}

/// Error raised by the upstream result callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The upstream answered with a non-success status.
    #[error("Upstream rejected result with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The request never completed.
    #[error("Upstream transport error: {0}")]
    Transport(String),
}

/// Error raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value was present but unusable.
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue {
        /// Setting name.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The config file could not be read.
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file was not valid JSON for the schema.
    #[error("Failed to parse config file {}: {reason}", path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
