//! Test assertions for verdicts.

use std::time::Duration;

use crate::core::{FollowUp, StageId, Verdict, VerdictReason};

/// Asserts that the verdict is an ACK with the given reason.
pub fn assert_ack(verdict: &Verdict, reason: VerdictReason) {
    assert!(
        verdict.is_ack(),
        "Expected ACK ({reason}), got NACK: {verdict:?}"
    );
    assert_eq!(
        verdict.reason, reason,
        "Expected reason {reason}, got {}",
        verdict.reason
    );
}

/// Asserts that the verdict is a NACK whose delay lies within `[min, max]`.
pub fn assert_nack_within(verdict: &Verdict, min: Duration, max: Duration) {
    assert!(verdict.is_nack(), "Expected NACK, got ACK: {verdict:?}");
    let delay = verdict
        .retry_after
        .unwrap_or_else(|| panic!("NACK without a retry delay: {verdict:?}"));
    assert!(
        delay >= min && delay <= max,
        "Expected delay within {min:?}..={max:?}, got {delay:?}"
    );
}

/// Asserts that the verdict advances the run to `stage`.
pub fn assert_advances_to(verdict: &Verdict, stage: &StageId) {
    assert_ack(verdict, VerdictReason::Advanced);
    assert_eq!(
        verdict.follow_up.as_ref(),
        Some(&FollowUp::Advance(stage.clone())),
        "Expected follow-up to {stage}"
    );
}

/// Asserts that the verdict ends the run without completing it.
pub fn assert_abandoned(verdict: &Verdict) {
    assert!(
        verdict.is_ack() && verdict.reason.is_abandonment(),
        "Expected an abandoning ACK, got {verdict:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_ack() {
        assert_ack(&Verdict::ack(VerdictReason::Completed), VerdictReason::Completed);
    }

    #[test]
    #[should_panic(expected = "Expected ACK")]
    fn test_assert_ack_fails_on_nack() {
        let verdict = Verdict::nack(VerdictReason::Retry, Duration::from_secs(1));
        assert_ack(&verdict, VerdictReason::Retry);
    }

    #[test]
    fn test_assert_nack_within() {
        let verdict = Verdict::nack(VerdictReason::Retry, Duration::from_millis(1500));
        assert_nack_within(&verdict, Duration::from_secs(1), Duration::from_secs(3));
    }

    #[test]
    #[should_panic(expected = "Expected delay within")]
    fn test_assert_nack_within_out_of_range() {
        let verdict = Verdict::nack(VerdictReason::Retry, Duration::from_secs(5));
        assert_nack_within(&verdict, Duration::from_secs(1), Duration::from_secs(3));
    }

    #[test]
    fn test_assert_advances_to() {
        let verdict = Verdict::ack(VerdictReason::Advanced)
            .with_follow_up(FollowUp::Advance(StageId::smart()));
        assert_advances_to(&verdict, &StageId::smart());
    }

    #[test]
    fn test_assert_abandoned() {
        assert_abandoned(&Verdict::ack(VerdictReason::Exhausted));
    }
}
