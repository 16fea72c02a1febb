//! Acknowledgement verdicts.

use super::{AckAction, StageId, WorkItem};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    /// The stage succeeded and the run is complete.
    Completed,
    /// The stage succeeded and the next stage was enqueued.
    Advanced,
    /// Retryable failure within budget; the broker redelivers.
    Retry,
    /// Retryable failure with the attempt budget spent; the run is abandoned.
    Exhausted,
    /// Terminal failure; redelivery would not help.
    NonRetryable,
    /// Retryable failure; the whole run was re-enqueued from its first stage.
    Restarted,
    /// The delivery could not be decoded.
    MalformedEnvelope,
    /// The delivery names a stage with no executor.
    UnknownStage,
    /// The follow-up could not be enqueued; the stage is redelivered.
    EnqueueFailed,
    /// The follow-up stage has no publish route; the run is abandoned.
    Unroutable,
}

impl VerdictReason {
    /// Returns the taxonomy code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Advanced => "advanced",
            Self::Retry => "retry",
            Self::Exhausted => "exhausted",
            Self::NonRetryable => "non_retryable",
            Self::Restarted => "restarted",
            Self::MalformedEnvelope => "malformed_envelope",
            Self::UnknownStage => "unknown_stage",
            Self::EnqueueFailed => "enqueue_failed",
            Self::Unroutable => "unroutable",
        }
    }

    /// Returns true if the run ends here without completing.
    #[must_use]
    pub const fn is_abandonment(&self) -> bool {
        matches!(
            self,
            Self::Exhausted
                | Self::NonRetryable
                | Self::MalformedEnvelope
                | Self::UnknownStage
                | Self::Unroutable
        )
    }
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enqueue instruction carried alongside an ACK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "stage", rename_all = "snake_case")]
pub enum FollowUp {
    /// Enqueue the next stage of the run with a fresh attempt counter.
    Advance(StageId),
    /// Re-enqueue the run from this stage, counting one more restart.
    Restart(StageId),
}

impl FollowUp {
    /// Returns the stage to enqueue.
    #[must_use]
    pub const fn stage(&self) -> &StageId {
        match self {
            Self::Advance(s) | Self::Restart(s) => s,
        }
    }

    /// Builds the work item to enqueue from the current delivery.
    #[must_use]
    pub fn build(&self, current: &WorkItem) -> WorkItem {
        match self {
            Self::Advance(next) => current.advance_to(next.clone()),
            Self::Restart(first) => current.restart_from(first.clone()),
        }
    }
}

/// The per-delivery decision returned to the broker.
///
/// Computed once, returned synchronously, then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// ACK or NACK.
    pub action: AckAction,
    /// Taxonomy code.
    pub reason: VerdictReason,
    /// Backoff hint; only present on NACK.
    pub retry_after: Option<Duration>,
    /// Work to enqueue once the delivery is acknowledged.
    pub follow_up: Option<FollowUp>,
    /// Context for logs and the response body.
    pub detail: Option<String>,
}

impl Verdict {
    /// Creates an ACK verdict.
    #[must_use]
    pub const fn ack(reason: VerdictReason) -> Self {
        Self {
            action: AckAction::Ack,
            reason,
            retry_after: None,
            follow_up: None,
            detail: None,
        }
    }

    /// Creates a NACK verdict with a backoff hint.
    #[must_use]
    pub const fn nack(reason: VerdictReason, retry_after: Duration) -> Self {
        Self {
            action: AckAction::Nack,
            reason,
            retry_after: Some(retry_after),
            follow_up: None,
            detail: None,
        }
    }

    /// Attaches a follow-up enqueue instruction.
    #[must_use]
    pub fn with_follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = Some(follow_up);
        self
    }

    /// Attaches a detail message.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Returns true for ACK.
    #[must_use]
    pub const fn is_ack(&self) -> bool {
        matches!(self.action, AckAction::Ack)
    }

    /// Returns true for NACK.
    #[must_use]
    pub const fn is_nack(&self) -> bool {
        matches!(self.action, AckAction::Nack)
    }

    /// Backoff hint in whole milliseconds.
    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    /// Converts to the JSON body returned to the broker.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "action": self.action,
            "reason": self.reason,
        });
        if let Some(ms) = self.retry_after_ms() {
            body["retry_after_ms"] = serde_json::json!(ms);
        }
        if let Some(ref follow_up) = self.follow_up {
            body["follow_up"] = serde_json::json!(follow_up);
        }
        if let Some(ref detail) = self.detail {
            body["detail"] = serde_json::json!(detail);
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Payload;

    #[test]
    fn test_reason_codes() {
        assert_eq!(VerdictReason::Retry.to_string(), "retry");
        assert_eq!(VerdictReason::Exhausted.to_string(), "exhausted");
        assert_eq!(VerdictReason::NonRetryable.to_string(), "non_retryable");
        assert_eq!(
            serde_json::to_string(&VerdictReason::MalformedEnvelope).unwrap(),
            r#""malformed_envelope""#
        );
    }

    #[test]
    fn test_abandonment_reasons() {
        assert!(VerdictReason::Exhausted.is_abandonment());
        assert!(VerdictReason::NonRetryable.is_abandonment());
        assert!(VerdictReason::UnknownStage.is_abandonment());
        assert!(!VerdictReason::Retry.is_abandonment());
        assert!(!VerdictReason::Advanced.is_abandonment());
        assert!(!VerdictReason::Restarted.is_abandonment());
    }

    #[test]
    fn test_nack_carries_delay() {
        let verdict = Verdict::nack(VerdictReason::Retry, Duration::from_millis(1500));
        assert!(verdict.is_nack());
        assert_eq!(verdict.retry_after_ms(), Some(1500));

        let body = verdict.to_json();
        assert_eq!(body["action"], "nack");
        assert_eq!(body["reason"], "retry");
        assert_eq!(body["retry_after_ms"], 1500);
    }

    #[test]
    fn test_ack_body_has_no_delay() {
        let body = Verdict::ack(VerdictReason::Completed).to_json();
        assert_eq!(body, serde_json::json!({"action": "ack", "reason": "completed"}));
    }

    #[test]
    fn test_follow_up_build() {
        let current = WorkItem::new("p2", StageId::stt(), Payload::Bytes(vec![7])).with_attempt(2);

        let advance = FollowUp::Advance(StageId::smart()).build(&current);
        assert_eq!(advance.stage, StageId::smart());
        assert_eq!(advance.delivery_attempt, 1);
        assert_eq!(advance.restarts, 0);

        let restart = FollowUp::Restart(StageId::stt()).build(&current);
        assert_eq!(restart.stage, StageId::stt());
        assert_eq!(restart.restarts, 1);
    }
}
