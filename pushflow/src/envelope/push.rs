//! Wire types for broker push deliveries and outbound publishes.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::WorkItem;

/// Attribute naming the pipeline run.
pub const ATTR_PIPELINE_ID: &str = "pipeline_id";
/// Attribute naming the stage.
pub const ATTR_STAGE: &str = "stage";
/// Attribute carrying the attempt count when the broker does not send one.
pub const ATTR_ATTEMPT: &str = "attempt";
/// Attribute carrying the producer version tag.
pub const ATTR_VERSION: &str = "version";
/// Attribute counting whole-pipeline restarts.
pub const ATTR_RESTARTS: &str = "restarts";
/// Attribute declaring how `data` is encoded.
pub const ATTR_CONTENT_TYPE: &str = "content_type";

/// Attributes consumed by the decoder and regenerated on publish.
pub(crate) const RESERVED_ATTRIBUTES: [&str; 6] = [
    ATTR_PIPELINE_ID,
    ATTR_STAGE,
    ATTR_ATTEMPT,
    ATTR_VERSION,
    ATTR_RESTARTS,
    ATTR_CONTENT_TYPE,
];

/// Body of a push delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEnvelope {
    /// The delivered message.
    pub message: PushMessage,
    /// Subscription that delivered it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    /// Broker-maintained delivery attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_attempt: Option<i64>,
}

/// The message inside a push delivery.
///
/// The broker sends both camelCase and snake_case spellings of the id and
/// publish time, so both are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64 encoded payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Delivery attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Broker message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, rename = "message_id", skip_serializing_if = "Option::is_none")]
    message_id_snake: Option<String>,
    /// RFC 3339 publish time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
    #[serde(default, rename = "publish_time", skip_serializing_if = "Option::is_none")]
    publish_time_snake: Option<String>,
}

impl PushMessage {
    /// Returns the message id under either spelling.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.message_id
            .as_deref()
            .or(self.message_id_snake.as_deref())
    }

    /// Returns the publish time under either spelling.
    #[must_use]
    pub fn published_at(&self) -> Option<&str> {
        self.publish_time
            .as_deref()
            .or(self.publish_time_snake.as_deref())
    }
}

/// A message ready to publish to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Base64 encoded payload.
    pub data: String,
    /// Message attributes.
    pub attributes: BTreeMap<String, String>,
}

impl OutboundMessage {
    /// Encodes a work item for publishing.
    ///
    /// The attempt counter is not written: the broker starts a fresh count
    /// for every newly published message.
    #[must_use]
    pub fn from_work_item(item: &WorkItem) -> Self {
        let mut attributes = item.attributes.clone();
        attributes.insert(ATTR_PIPELINE_ID.to_string(), item.pipeline_id.clone());
        attributes.insert(ATTR_STAGE.to_string(), item.stage.to_string());
        attributes.insert(
            ATTR_CONTENT_TYPE.to_string(),
            item.payload.content_type().to_string(),
        );
        if item.restarts > 0 {
            attributes.insert(ATTR_RESTARTS.to_string(), item.restarts.to_string());
        }
        if let Some(ref version) = item.version {
            attributes.insert(ATTR_VERSION.to_string(), version.clone());
        }

        Self {
            data: STANDARD.encode(item.payload.to_bytes()),
            attributes,
        }
    }

    /// Returns the stage attribute.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        self.attributes.get(ATTR_STAGE).map(String::as_str)
    }

    /// Wraps the message the way the broker would when pushing it.
    #[must_use]
    pub fn into_push_envelope(
        self,
        message_id: impl Into<String>,
        delivery_attempt: u32,
    ) -> PushEnvelope {
        PushEnvelope {
            message: PushMessage {
                data: Some(self.data),
                attributes: self.attributes,
                message_id: Some(message_id.into()),
                publish_time: Some(chrono::Utc::now().to_rfc3339()),
                ..PushMessage::default()
            },
            subscription: None,
            delivery_attempt: Some(i64::from(delivery_attempt)),
        }
    }
}
