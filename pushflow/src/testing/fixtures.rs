//! Test fixtures for coordinator testing.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{StageId, Verdict};
use crate::dispatch::PipelineLayout;
use crate::enqueue::InMemoryEnqueuer;
use crate::envelope::{ATTR_PIPELINE_ID, ATTR_RESTARTS, ATTR_STAGE};
use crate::events::CollectingEventSink;
use crate::executor::StageRegistry;
use crate::retry::PolicyTable;
use crate::service::PushCoordinator;

/// Builds broker push bodies.
#[derive(Debug, Clone)]
pub struct PushBody {
    /// Payload document, base64 encoded on build.
    pub payload: serde_json::Value,
    /// Message attributes.
    pub attributes: BTreeMap<String, String>,
    /// Broker delivery attempt.
    pub delivery_attempt: Option<u32>,
    /// Broker message id.
    pub message_id: String,
}

impl PushBody {
    /// Creates a first delivery of `stage` for `pipeline_id`.
    #[must_use]
    pub fn new(pipeline_id: &str, stage: &str) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(ATTR_PIPELINE_ID.to_string(), pipeline_id.to_string());
        attributes.insert(ATTR_STAGE.to_string(), stage.to_string());
        Self {
            payload: serde_json::json!({"pipeline_id": pipeline_id}),
            attributes,
            delivery_attempt: Some(1),
            message_id: format!("msg-{pipeline_id}-{stage}"),
        }
    }

    /// Sets the payload document.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the delivery attempt.
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.delivery_attempt = Some(attempt);
        self
    }

    /// Sets the restart count.
    #[must_use]
    pub fn with_restarts(self, restarts: u32) -> Self {
        self.with_attribute(ATTR_RESTARTS, restarts.to_string())
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Removes an attribute.
    #[must_use]
    pub fn without_attribute(mut self, key: &str) -> Self {
        self.attributes.remove(key);
        self
    }

    /// Serializes the push body.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let data = STANDARD.encode(self.payload.to_string());
        let mut body = serde_json::json!({
            "message": {
                "data": data,
                "attributes": self.attributes,
                "messageId": self.message_id,
            },
            "subscription": "projects/test/subscriptions/push",
        });
        if let Some(attempt) = self.delivery_attempt {
            body["deliveryAttempt"] = serde_json::json!(attempt);
        }
        body.to_string().into_bytes()
    }
}

/// A coordinator wired to in-memory collaborators.
pub struct TestHarness {
    /// The coordinator under test.
    pub coordinator: Arc<PushCoordinator>,
    /// Captures follow-up publishes.
    pub enqueuer: Arc<InMemoryEnqueuer>,
    /// Captures emitted events.
    pub events: Arc<CollectingEventSink>,
}

impl TestHarness {
    /// Builds a harness over the speech layout.
    #[must_use]
    pub fn new(registry: StageRegistry, policies: PolicyTable) -> Self {
        Self::with_layout(registry, policies, PipelineLayout::speech())
    }

    /// Builds a harness over a custom layout.
    #[must_use]
    pub fn with_layout(
        registry: StageRegistry,
        policies: PolicyTable,
        layout: PipelineLayout,
    ) -> Self {
        let enqueuer = Arc::new(InMemoryEnqueuer::new());
        let events = Arc::new(CollectingEventSink::new());
        let coordinator = PushCoordinator::builder(registry, enqueuer.clone())
            .layout(layout)
            .policies(policies)
            .execution_ceiling(Duration::from_secs(2))
            .event_sink(events.clone())
            .build();

        Self {
            coordinator: Arc::new(coordinator),
            enqueuer,
            events,
        }
    }

    /// Delivers a body on the generic path for its stage attribute.
    pub async fn deliver(&self, body: &PushBody) -> Verdict {
        self.coordinator.handle(None, &body.to_bytes()).await
    }

    /// Stages of the published follow-ups, in publish order.
    #[must_use]
    pub fn published_stages(&self) -> Vec<StageId> {
        self.enqueuer
            .published()
            .iter()
            .filter_map(|m| m.stage().and_then(|s| StageId::parse(s).ok()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeDecoder;

    #[test]
    fn test_push_body_decodes() {
        let body = PushBody::new("p1", "stt")
            .with_attempt(2)
            .with_restarts(1)
            .with_payload(serde_json::json!({"pipeline_id": "p1", "note_id": "n1"}));

        let decoder = EnvelopeDecoder::new([StageId::stt()]);
        let item = decoder.decode(&body.to_bytes(), None).unwrap();
        assert_eq!(item.pipeline_id, "p1");
        assert_eq!(item.stage, StageId::stt());
        assert_eq!(item.delivery_attempt, 2);
        assert_eq!(item.restarts, 1);
        assert_eq!(item.message_id.as_deref(), Some("msg-p1-stt"));
    }

    #[test]
    fn test_push_body_without_stage() {
        let body = PushBody::new("p1", "stt").without_attribute(ATTR_STAGE);
        let decoder = EnvelopeDecoder::new([StageId::stt()]);
        assert!(decoder.decode(&body.to_bytes(), None).is_err());
        assert!(decoder
            .decode(&body.to_bytes(), Some(&StageId::stt()))
            .is_ok());
    }
}
