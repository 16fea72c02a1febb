//! Hand-off of follow-up work items to the broker.
//!
//! When a verdict carries a follow-up (advance to the next stage, or
//! restart the run) the coordinator publishes the new work item through a
//! [`StageEnqueuer`] before acknowledging the current delivery.

#[cfg(feature = "http-client")]
mod http;

#[cfg(feature = "http-client")]
pub use http::HttpPublisher;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::StageId;
use crate::envelope::OutboundMessage;
use crate::errors::{ConfigError, EnqueueError};

/// Publishes work items for a stage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StageEnqueuer: Send + Sync {
    /// Publishes a message to the destination of its `stage` attribute.
    ///
    /// Returns the broker-assigned message id.
    async fn enqueue(&self, message: &OutboundMessage) -> Result<String, EnqueueError>;
}

/// Where follow-up messages are published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Publish URL per stage, e.g.
    /// `https://pubsub.googleapis.com/v1/projects/p/topics/smart:publish`.
    #[serde(default)]
    pub topics: BTreeMap<StageId, String>,
    /// Bearer token sent with every publish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_publish_timeout_ms")]
    pub timeout_ms: u64,
}

const fn default_publish_timeout_ms() -> u64 {
    5_000
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topics: BTreeMap::new(),
            bearer_token: None,
            timeout_ms: default_publish_timeout_ms(),
        }
    }
}

impl PublisherConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a publish URL for a stage.
    #[must_use]
    pub fn with_topic(mut self, stage: StageId, url: impl Into<String>) -> Self {
        self.topics.insert(stage, url.into());
        self
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Checks that every publish URL is an http(s) URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (stage, url) in &self.topics {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::invalid(
                    format!("publisher.topics.{stage}"),
                    format!("'{url}' is not an http(s) URL"),
                ));
            }
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::invalid("publisher.timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Keeps published messages in memory.
///
/// Backs the test harness; nothing is ever delivered to a broker.
#[derive(Debug, Default)]
pub struct InMemoryEnqueuer {
    published: Mutex<Vec<(String, OutboundMessage)>>,
}

impl InMemoryEnqueuer {
    /// Creates an empty enqueuer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the published messages in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    /// Removes and returns the published messages with their ids.
    pub fn drain(&self) -> Vec<(String, OutboundMessage)> {
        std::mem::take(&mut *self.published.lock())
    }

    /// Returns the number of published messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    /// Returns true if nothing was published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.published.lock().is_empty()
    }
}

#[async_trait]
impl StageEnqueuer for InMemoryEnqueuer {
    async fn enqueue(&self, message: &OutboundMessage) -> Result<String, EnqueueError> {
        if message.stage().is_none() {
            return Err(EnqueueError::NoRoute("<missing stage attribute>".to_string()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.published.lock().push((id.clone(), message.clone()));
        tracing::debug!(message_id = %id, stage = ?message.stage(), "Enqueued in memory");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Payload, WorkItem};

    fn message(stage: StageId) -> OutboundMessage {
        OutboundMessage::from_work_item(&WorkItem::new("p1", stage, Payload::Bytes(vec![1, 2])))
    }

    #[tokio::test]
    async fn test_in_memory_enqueue() {
        let enqueuer = InMemoryEnqueuer::new();
        let id = enqueuer.enqueue(&message(StageId::smart())).await.unwrap();

        assert!(!id.is_empty());
        assert_eq!(enqueuer.len(), 1);
        assert_eq!(enqueuer.published()[0].stage(), Some("smart"));

        let drained = enqueuer.drain();
        assert_eq!(drained[0].0, id);
        assert!(enqueuer.is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_requires_stage() {
        let enqueuer = InMemoryEnqueuer::new();
        let mut msg = message(StageId::stt());
        msg.attributes.remove(crate::envelope::ATTR_STAGE);

        assert!(matches!(
            enqueuer.enqueue(&msg).await,
            Err(EnqueueError::NoRoute(_))
        ));
    }

    #[test]
    fn test_publisher_config() {
        let config = PublisherConfig::new()
            .with_topic(StageId::smart(), "https://pubsub.example/v1/topics/smart:publish")
            .with_bearer_token("t");
        assert!(config.validate().is_ok());
        assert!(config.topics.contains_key(&StageId::smart()));

        let bad = PublisherConfig::new().with_topic(StageId::smart(), "smart-topic");
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_publisher_config_defaults() {
        let config: PublisherConfig = serde_json::from_str(r#"{"topics": {"smart": "http://x"}}"#).unwrap();
        assert_eq!(config.timeout_ms, 5_000);
        assert_eq!(config.topics.get(&StageId::smart()).unwrap(), "http://x");
    }
}
