//! Broker REST publisher.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{PublisherConfig, StageEnqueuer};
use crate::core::StageId;
use crate::envelope::OutboundMessage;
use crate::errors::EnqueueError;

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// Publishes follow-up messages through the broker's REST publish API.
///
/// One publish URL per stage; the body is
/// `{"messages": [{"data": ..., "attributes": {...}}]}`.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: reqwest::Client,
    topics: BTreeMap<StageId, String>,
    bearer_token: Option<String>,
}

impl HttpPublisher {
    /// Creates a publisher from configuration.
    pub fn new(config: &PublisherConfig) -> Result<Self, EnqueueError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| EnqueueError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            topics: config.topics.clone(),
            bearer_token: config.bearer_token.clone(),
        })
    }

    fn topic_for(&self, message: &OutboundMessage) -> Result<&str, EnqueueError> {
        let raw = message
            .stage()
            .ok_or_else(|| EnqueueError::NoRoute("<missing stage attribute>".to_string()))?;
        let stage = StageId::parse(raw).map_err(|_| EnqueueError::NoRoute(raw.to_string()))?;
        self.topics
            .get(&stage)
            .map(String::as_str)
            .ok_or_else(|| EnqueueError::NoRoute(stage.to_string()))
    }
}

#[async_trait]
impl StageEnqueuer for HttpPublisher {
    async fn enqueue(&self, message: &OutboundMessage) -> Result<String, EnqueueError> {
        let url = self.topic_for(message)?;
        let body = serde_json::json!({ "messages": [message] });

        let mut request = self.client.post(url).json(&body);
        if let Some(ref token) = self.bearer_token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| EnqueueError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| EnqueueError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(EnqueueError::Rejected {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let parsed: PublishResponse = serde_json::from_str(&text).unwrap_or(PublishResponse {
            message_ids: Vec::new(),
        });
        let id = parsed.message_ids.into_iter().next().unwrap_or_default();

        tracing::debug!(url, message_id = %id, stage = ?message.stage(), "Published follow-up");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Payload, WorkItem};

    fn publisher() -> HttpPublisher {
        HttpPublisher::new(
            &PublisherConfig::new()
                .with_topic(StageId::smart(), "http://127.0.0.1:9/v1/topics/smart:publish"),
        )
        .unwrap()
    }

    #[test]
    fn test_topic_lookup() {
        let publisher = publisher();
        let smart = OutboundMessage::from_work_item(&WorkItem::new(
            "p1",
            StageId::smart(),
            Payload::Bytes(vec![]),
        ));
        assert_eq!(
            publisher.topic_for(&smart).unwrap(),
            "http://127.0.0.1:9/v1/topics/smart:publish"
        );

        let stt = OutboundMessage::from_work_item(&WorkItem::new(
            "p1",
            StageId::stt(),
            Payload::Bytes(vec![]),
        ));
        assert_eq!(
            publisher.topic_for(&stt).unwrap_err(),
            EnqueueError::NoRoute("stt".to_string())
        );
    }

    #[test]
    fn test_publish_response_parse() {
        let parsed: PublishResponse =
            serde_json::from_str(r#"{"messageIds": ["3497200"]}"#).unwrap();
        assert_eq!(parsed.message_ids, vec!["3497200".to_string()]);
    }

    #[tokio::test]
    async fn test_unroutable_message_fails_before_sending() {
        let publisher = publisher();
        let msg = OutboundMessage::from_work_item(&WorkItem::new(
            "p1",
            StageId::stt(),
            Payload::Bytes(vec![]),
        ));
        assert!(matches!(
            publisher.enqueue(&msg).await,
            Err(EnqueueError::NoRoute(_))
        ));
    }
}
