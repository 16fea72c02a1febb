//! Executor that delegates a stage to a remote HTTP service.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::StatusCode;

use super::{EndpointConfig, ExecutionResult, StageExecutor};
use crate::core::{OutcomeStatus, Payload, StageId, StageOutcome, WorkItem};
use crate::errors::StageExecutionError;

const MAX_ERROR_BODY: usize = 512;

/// Runs a stage by posting the work item to a remote service.
///
/// The request body carries the work item and its idempotency key. A 2xx
/// response is a success whose JSON body becomes the stage output, unless
/// the body is itself a stage outcome (it has a `status` field). Other
/// statuses map to failures: 408, 429 and 5xx are retryable, the remaining
/// 4xx are terminal. Transport errors are retryable.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    stage: StageId,
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpExecutor {
    /// Creates an executor for `stage` calling the configured endpoint.
    pub fn new(stage: StageId, endpoint: &EndpointConfig) -> Result<Self, StageExecutionError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| StageExecutionError::fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            stage,
            client,
            url: endpoint.url.clone(),
            bearer_token: endpoint.bearer_token.clone(),
        })
    }

    /// Builds the JSON request body for a work item.
    #[must_use]
    pub fn request_body(item: &WorkItem) -> serde_json::Value {
        let payload = match item.payload {
            Payload::Json(ref value) => value.clone(),
            Payload::Bytes(ref bytes) => serde_json::json!(STANDARD.encode(bytes)),
        };

        serde_json::json!({
            "pipeline_id": item.pipeline_id,
            "stage": item.stage,
            "attempt": item.delivery_attempt,
            "restarts": item.restarts,
            "idempotency_key": item.idempotency_key(),
            "enqueue_time": item.enqueue_time.to_rfc3339(),
            "content_type": item.payload.content_type(),
            "payload": payload,
            "attributes": item.attributes,
        })
    }
}

fn classify_failure(status: StatusCode, body: &str) -> StageExecutionError {
    let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
    let message = format!("executor endpoint answered {}: {snippet}", status.as_u16());
    match status.as_u16() {
        408 | 429 | 500..=599 => StageExecutionError::transient(message),
        _ => StageExecutionError::fatal(message),
    }
}

fn parse_success(body: &str) -> StageOutcome {
    if body.trim().is_empty() {
        return StageOutcome::success();
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) if value.get("status").is_some() => {
            serde_json::from_value::<StageOutcome>(value.clone())
                .unwrap_or_else(|_| StageOutcome::success().with_output(value))
        }
        Ok(value) => StageOutcome::success().with_output(value),
        Err(_) => StageOutcome::success().with_output(serde_json::json!(body)),
    }
}

#[async_trait]
impl StageExecutor for HttpExecutor {
    fn stage(&self) -> &StageId {
        &self.stage
    }

    async fn execute(&self, item: &WorkItem) -> ExecutionResult {
        let mut request = self.client.post(&self.url).json(&Self::request_body(item));
        if let Some(ref token) = self.bearer_token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(|e| {
            StageExecutionError::transient(format!("executor endpoint unreachable: {e}"))
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            StageExecutionError::transient(format!("executor response unreadable: {e}"))
        })?;

        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }

        let outcome = parse_success(&body);
        if outcome.status != OutcomeStatus::Success {
            tracing::debug!(
                pipeline_id = %item.pipeline_id,
                stage = %self.stage,
                status = %outcome.status,
                "Executor endpoint reported a failure outcome"
            );
        }
        Ok(outcome)
    }
}
