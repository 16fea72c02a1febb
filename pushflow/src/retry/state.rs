//! Pipeline run state derived from verdicts.
//!
//! The core stores none of this. A run's state is recomputed from the
//! current stage and the verdict of each delivery, which is all the
//! coordinator needs for logging and events.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::{StageId, Verdict, VerdictReason};

/// State of a pipeline run after a delivery was decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunState {
    /// Waiting for a delivery of this stage.
    PendingStage(StageId),
    /// Every stage succeeded.
    Complete,
    /// The run stopped without completing.
    Abandoned,
}

impl RunState {
    /// Derives the state that follows a verdict for `current`.
    #[must_use]
    pub fn after(current: &StageId, verdict: &Verdict) -> Self {
        if verdict.is_nack() {
            return Self::PendingStage(current.clone());
        }
        if let Some(ref follow_up) = verdict.follow_up {
            return Self::PendingStage(follow_up.stage().clone());
        }
        match verdict.reason {
            VerdictReason::Completed => Self::Complete,
            reason if reason.is_abandonment() => Self::Abandoned,
            // An ACK without follow-up that neither completes nor abandons
            // cannot be produced by the decision engine.
            _ => Self::Complete,
        }
    }

    /// Returns true for states no delivery can leave.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Abandoned)
    }

    /// Returns the stage the run waits on, if any.
    #[must_use]
    pub const fn pending_stage(&self) -> Option<&StageId> {
        match self {
            Self::PendingStage(stage) => Some(stage),
            Self::Complete | Self::Abandoned => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PendingStage(stage) => write!(f, "pending:{stage}"),
            Self::Complete => write!(f, "complete"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FollowUp;
    use std::time::Duration;

    #[test]
    fn test_nack_stays_on_stage() {
        let verdict = Verdict::nack(VerdictReason::Retry, Duration::from_secs(1));
        let state = RunState::after(&StageId::stt(), &verdict);
        assert_eq!(state, RunState::PendingStage(StageId::stt()));
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_advance_moves_to_next_stage() {
        let verdict =
            Verdict::ack(VerdictReason::Advanced).with_follow_up(FollowUp::Advance(StageId::smart()));
        let state = RunState::after(&StageId::stt(), &verdict);
        assert_eq!(state.pending_stage(), Some(&StageId::smart()));
    }

    #[test]
    fn test_restart_returns_to_first_stage() {
        let verdict =
            Verdict::ack(VerdictReason::Restarted).with_follow_up(FollowUp::Restart(StageId::stt()));
        let state = RunState::after(&StageId::smart(), &verdict);
        assert_eq!(state, RunState::PendingStage(StageId::stt()));
    }

    #[test]
    fn test_terminal_states() {
        let complete = RunState::after(&StageId::smart(), &Verdict::ack(VerdictReason::Completed));
        assert_eq!(complete, RunState::Complete);
        assert!(complete.is_terminal());

        for reason in [
            VerdictReason::Exhausted,
            VerdictReason::NonRetryable,
            VerdictReason::MalformedEnvelope,
            VerdictReason::UnknownStage,
            VerdictReason::Unroutable,
        ] {
            let state = RunState::after(&StageId::stt(), &Verdict::ack(reason));
            assert_eq!(state, RunState::Abandoned, "{reason}");
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(RunState::PendingStage(StageId::smart()).to_string(), "pending:smart");
        assert_eq!(RunState::Abandoned.to_string(), "abandoned");
    }
}
