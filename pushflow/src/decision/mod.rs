//! Acknowledgement decision engine.
//!
//! Pure functions from a stage outcome, the broker-reported attempt and a
//! retry policy to a [`Verdict`]. No I/O, no clock, no shared state: the
//! same inputs always produce the same verdict.
//!
//! | outcome | condition | verdict |
//! |---|---|---|
//! | success | next stage named | ACK `advanced` + advance follow-up |
//! | success | no next stage | ACK `completed` |
//! | retryable | attempt < max, stage retry | NACK `retry` + delay |
//! | retryable | attempt < max, restart | ACK `restarted` + restart follow-up |
//! | retryable | attempt >= max | ACK `exhausted` |
//! | terminal | any | ACK `non_retryable` |
//!
//! A follow-up that cannot be enqueued replaces the ACK through
//! [`decide_enqueue_failure`].

use crate::core::{FollowUp, OutcomeStatus, StageOutcome, Verdict, VerdictReason};
use crate::errors::{EnqueueError, EnvelopeError};
use crate::retry::{RetryMode, RetryPolicy};

/// Decides how to acknowledge a delivery.
///
/// `attempt` is 1-based; in restart mode pass
/// [`RetryPolicy::effective_attempt`].
#[must_use]
pub fn decide(outcome: &StageOutcome, attempt: u32, policy: &RetryPolicy) -> Verdict {
    let attempt = attempt.max(1);

    let verdict = match outcome.status {
        OutcomeStatus::Success => match outcome.next_stage {
            Some(ref next) => Verdict::ack(VerdictReason::Advanced)
                .with_follow_up(FollowUp::Advance(next.clone())),
            None => Verdict::ack(VerdictReason::Completed),
        },
        OutcomeStatus::RetryableFailure if attempt >= policy.max_attempts => {
            Verdict::ack(VerdictReason::Exhausted)
        }
        OutcomeStatus::RetryableFailure => match (policy.mode, policy.restart_from.as_ref()) {
            (RetryMode::RestartPipeline, Some(first)) => Verdict::ack(VerdictReason::Restarted)
                .with_follow_up(FollowUp::Restart(first.clone())),
            // Restart mode with no known first stage degrades to a stage retry.
            (RetryMode::RetryStage | RetryMode::RestartPipeline, _) => {
                Verdict::nack(VerdictReason::Retry, policy.backoff.delay(attempt))
            }
        },
        OutcomeStatus::TerminalFailure => Verdict::ack(VerdictReason::NonRetryable),
    };

    match outcome.detail {
        Some(ref detail) => verdict.with_detail(detail.clone()),
        None => verdict,
    }
}

/// Verdict for a delivery that could not be decoded.
///
/// Always an ACK: redelivering unparseable input cannot succeed.
#[must_use]
pub fn decide_rejected(error: &EnvelopeError) -> Verdict {
    let reason = match error {
        EnvelopeError::Malformed { .. } => VerdictReason::MalformedEnvelope,
        EnvelopeError::UnknownStage { .. } => VerdictReason::UnknownStage,
    };
    Verdict::ack(reason).with_detail(error.to_string())
}

/// Verdict replacing an ACK whose follow-up could not be enqueued.
///
/// A missing publish route is terminal: redelivery reaches the same
/// missing route, so the run is abandoned with `unroutable`. Other
/// failures redeliver the stage so the transition is retried, within the
/// same attempt budget as a retryable stage failure.
#[must_use]
pub fn decide_enqueue_failure(error: &EnqueueError, attempt: u32, policy: &RetryPolicy) -> Verdict {
    let attempt = attempt.max(1);

    let verdict = match error {
        EnqueueError::NoRoute(_) => Verdict::ack(VerdictReason::Unroutable),
        _ if attempt >= policy.max_attempts => Verdict::ack(VerdictReason::Exhausted),
        _ => Verdict::nack(VerdictReason::EnqueueFailed, policy.backoff.delay(attempt)),
    };
    verdict.with_detail(error.to_string())
}
