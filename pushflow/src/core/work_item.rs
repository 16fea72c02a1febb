//! Work items decoded from push deliveries.

use super::StageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Content type for JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Content type for opaque binary payloads.
pub const CONTENT_TYPE_BYTES: &str = "application/octet-stream";

/// The stage input carried by a delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "body", rename_all = "snake_case")]
pub enum Payload {
    /// A JSON document.
    Json(serde_json::Value),
    /// Opaque bytes (e.g. audio).
    Bytes(Vec<u8>),
}

impl Payload {
    /// Returns the JSON document, if this is a JSON payload.
    #[must_use]
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Bytes(_) => None,
        }
    }

    /// Returns the content type this payload is declared with on the wire.
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        match self {
            Self::Json(_) => CONTENT_TYPE_JSON,
            Self::Bytes(_) => CONTENT_TYPE_BYTES,
        }
    }

    /// Serializes the payload to its wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            // Serializing a Value cannot fail.
            Self::Json(v) => serde_json::to_vec(v).unwrap_or_default(),
            Self::Bytes(b) => b.clone(),
        }
    }

    /// Returns true if the payload carries nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Json(v) => v.is_null(),
            Self::Bytes(b) => b.is_empty(),
        }
    }
}

/// One delivery of one stage of a pipeline run.
///
/// `pipeline_id` is stable across every redelivery and every stage of the
/// same run, and is the idempotency key executors must deduplicate on.
/// `stage` never changes once enqueued: a failed stage is redelivered as
/// the same stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Identifier of the pipeline run.
    pub pipeline_id: String,
    /// The stage this delivery executes.
    pub stage: StageId,
    /// Stage input.
    pub payload: Payload,
    /// Broker-supplied delivery attempt, starting at 1.
    pub delivery_attempt: u32,
    /// When the message was published.
    pub enqueue_time: DateTime<Utc>,
    /// Broker message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Producer version tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Whole-pipeline restarts already performed for this run.
    #[serde(default)]
    pub restarts: u32,
    /// Remaining broker attributes, passed through to follow-up items.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl WorkItem {
    /// Creates a first-attempt work item enqueued now.
    #[must_use]
    pub fn new(pipeline_id: impl Into<String>, stage: StageId, payload: Payload) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            stage,
            payload,
            delivery_attempt: 1,
            enqueue_time: Utc::now(),
            message_id: None,
            version: None,
            restarts: 0,
            attributes: BTreeMap::new(),
        }
    }

    /// Sets the delivery attempt.
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.delivery_attempt = attempt;
        self
    }

    /// Sets the restart count.
    #[must_use]
    pub fn with_restarts(mut self, restarts: u32) -> Self {
        self.restarts = restarts;
        self
    }

    /// Sets the version tag.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Sets the broker message id.
    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sets the enqueue time.
    #[must_use]
    pub fn with_enqueue_time(mut self, time: DateTime<Utc>) -> Self {
        self.enqueue_time = time;
        self
    }

    /// Stable key for executors that deduplicate side effects.
    ///
    /// Hex sha256 over pipeline id and stage; identical for every
    /// redelivery of the same stage of the same run.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.pipeline_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.stage.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Builds the work item for the next stage of the run.
    ///
    /// Stage transitions are pipeline level: the attempt counter starts
    /// over at 1 and the broker message id is not carried.
    #[must_use]
    pub fn advance_to(&self, next: StageId) -> Self {
        Self {
            pipeline_id: self.pipeline_id.clone(),
            stage: next,
            payload: self.payload.clone(),
            delivery_attempt: 1,
            enqueue_time: Utc::now(),
            message_id: None,
            version: self.version.clone(),
            restarts: self.restarts,
            attributes: self.attributes.clone(),
        }
    }

    /// Builds the work item that restarts the run from `first`.
    #[must_use]
    pub fn restart_from(&self, first: StageId) -> Self {
        let mut item = self.advance_to(first);
        item.restarts = self.restarts.saturating_add(1);
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> WorkItem {
        WorkItem::new(
            "p1",
            StageId::stt(),
            Payload::Json(serde_json::json!({"note_id": "n1"})),
        )
    }

    #[test]
    fn test_defaults() {
        let item = item();
        assert_eq!(item.delivery_attempt, 1);
        assert_eq!(item.restarts, 0);
        assert!(item.message_id.is_none());
    }

    #[test]
    fn test_idempotency_key_stable_across_attempts() {
        let first = item();
        let redelivered = item().with_attempt(4).with_message_id("m-9");
        assert_eq!(first.idempotency_key(), redelivered.idempotency_key());
        assert_eq!(first.idempotency_key().len(), 64);

        let other_stage = first.advance_to(StageId::smart());
        assert_ne!(first.idempotency_key(), other_stage.idempotency_key());
    }

    #[test]
    fn test_advance_resets_attempt() {
        let current = item().with_attempt(3).with_message_id("m-1").with_version("v2");
        let next = current.advance_to(StageId::smart());

        assert_eq!(next.pipeline_id, "p1");
        assert_eq!(next.stage, StageId::smart());
        assert_eq!(next.delivery_attempt, 1);
        assert_eq!(next.version.as_deref(), Some("v2"));
        assert!(next.message_id.is_none());
        assert_eq!(next.payload, current.payload);
    }

    #[test]
    fn test_restart_increments_restarts() {
        let current = WorkItem::new("p1", StageId::smart(), Payload::Bytes(vec![1, 2]))
            .with_attempt(2)
            .with_restarts(1);
        let restarted = current.restart_from(StageId::stt());

        assert_eq!(restarted.stage, StageId::stt());
        assert_eq!(restarted.restarts, 2);
        assert_eq!(restarted.delivery_attempt, 1);
    }

    #[test]
    fn test_payload_bytes() {
        let json = Payload::Json(serde_json::json!({"a": 1}));
        assert_eq!(json.to_bytes(), br#"{"a":1}"#.to_vec());
        assert_eq!(json.content_type(), CONTENT_TYPE_JSON);

        let bytes = Payload::Bytes(Vec::new());
        assert!(bytes.is_empty());
        assert_eq!(bytes.content_type(), CONTENT_TYPE_BYTES);
    }
}
