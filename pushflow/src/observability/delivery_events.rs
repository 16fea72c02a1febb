//! Structured events describing delivery decisions.

use std::sync::Arc;

use crate::core::{FollowUp, StageId, Verdict, WorkItem};
use crate::events::{event_types, EventSink};
use crate::retry::RunState;

/// Builds and emits the per-delivery event and run transition events.
#[derive(Debug, Clone)]
pub struct DeliveryEventEmitter {
    sink: Arc<dyn EventSink>,
}

impl DeliveryEventEmitter {
    /// Creates an emitter over a sink.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Returns the underlying sink.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Builds the `delivery.decided` payload.
    ///
    /// `item` is `None` when the delivery could not be decoded; the stage
    /// then comes from the route, if it had one.
    #[must_use]
    pub fn build_decided_payload(
        item: Option<&WorkItem>,
        route_stage: Option<&StageId>,
        verdict: &Verdict,
        duration_ms: f64,
    ) -> serde_json::Value {
        let stage = item.map(|i| &i.stage).or(route_stage);
        let mut payload = serde_json::json!({
            "pipeline_id": item.map(|i| i.pipeline_id.as_str()),
            "stage": stage.map(StageId::as_str),
            "attempt": item.map(|i| i.delivery_attempt),
            "restarts": item.map(|i| i.restarts),
            "message_id": item.and_then(|i| i.message_id.as_deref()),
            "action": verdict.action,
            "reason": verdict.reason,
            "retry_after_ms": verdict.retry_after_ms(),
            "duration_ms": duration_ms,
        });

        if let Some(ref detail) = verdict.detail {
            payload["detail"] = serde_json::json!(detail);
        }
        if let Some(ref follow_up) = verdict.follow_up {
            payload["follow_up"] = serde_json::json!(follow_up);
        }

        payload
    }

    /// Emits the `delivery.decided` event.
    pub fn emit_decided(
        &self,
        item: Option<&WorkItem>,
        route_stage: Option<&StageId>,
        verdict: &Verdict,
        duration_ms: f64,
    ) {
        let payload = Self::build_decided_payload(item, route_stage, verdict, duration_ms);
        self.sink
            .emit(event_types::DELIVERY_DECIDED, Some(payload));
    }

    /// Emits the run transition implied by a verdict, if any.
    ///
    /// Returns the run state after the verdict.
    pub fn emit_transition(
        &self,
        item: Option<&WorkItem>,
        route_stage: Option<&StageId>,
        verdict: &Verdict,
    ) -> Option<RunState> {
        let current = item.map(|i| &i.stage).or(route_stage);
        let state = match current {
            Some(stage) => RunState::after(stage, verdict),
            // Undecodable and unrouted: nothing to pend on.
            None if verdict.reason.is_abandonment() => RunState::Abandoned,
            None => return None,
        };

        let event_type = match (&state, &verdict.follow_up) {
            (RunState::PendingStage(_), Some(FollowUp::Advance(_))) => event_types::PIPELINE_ADVANCED,
            (RunState::PendingStage(_), Some(FollowUp::Restart(_))) => event_types::PIPELINE_RESTARTED,
            (RunState::PendingStage(_), None) => return Some(state),
            (RunState::Complete, _) => event_types::PIPELINE_COMPLETED,
            (RunState::Abandoned, _) => event_types::PIPELINE_ABANDONED,
        };

        let mut payload = serde_json::json!({
            "pipeline_id": item.map(|i| i.pipeline_id.as_str()),
            "stage": current.map(StageId::as_str),
            "reason": verdict.reason,
            "state": state.to_string(),
        });
        if let Some(ref follow_up) = verdict.follow_up {
            payload["to"] = serde_json::json!(follow_up.stage());
        }
        if let Some(item) = item {
            payload["attempt"] = serde_json::json!(item.delivery_attempt);
            payload["restarts"] = serde_json::json!(item.restarts);
        }
        if let Some(ref detail) = verdict.detail {
            payload["detail"] = serde_json::json!(detail);
        }

        self.sink.emit(event_type, Some(payload));
        Some(state)
    }
}
