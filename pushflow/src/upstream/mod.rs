//! Best-effort reporting of stage results to the upstream service.
//!
//! After every acknowledged delivery the coordinator posts the stage result
//! to `{upstream_url}/processed-output`. Failures are logged and never
//! change the verdict.

#[cfg(feature = "http-client")]
mod http;

#[cfg(feature = "http-client")]
pub use http::HttpUpstreamReporter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{StageOutcome, Verdict, VerdictReason, WorkItem};
use crate::errors::UpstreamError;

/// Payload fields copied into the report when the payload carries them.
pub const PASSTHROUGH_FIELDS: [&str; 3] = ["note_id", "user_id", "location"];

/// Result of one acknowledged delivery, as sent upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedOutput {
    /// Pipeline run id.
    pub pipeline_id: String,
    /// Stage that ran.
    pub branch: String,
    /// Delivery attempt that produced the verdict.
    pub attempt: u32,
    /// Verdict reason code.
    pub reason: VerdictReason,
    /// Stage result document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_output: Option<serde_json::Value>,
    /// Failure detail when the stage did not succeed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the report was built.
    pub timestamp: DateTime<Utc>,
    /// Identifying fields carried over from the payload.
    #[serde(flatten)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl ProcessedOutput {
    /// Builds the report for an acknowledged delivery.
    #[must_use]
    pub fn build(item: &WorkItem, outcome: &StageOutcome, verdict: &Verdict) -> Self {
        let error = if outcome.is_success() {
            None
        } else {
            outcome
                .detail
                .clone()
                .or_else(|| Some(verdict.reason.to_string()))
        };

        let mut context = serde_json::Map::new();
        if let Some(payload) = item.payload.as_json() {
            let source = payload.get("data").filter(|d| d.is_object()).unwrap_or(payload);
            for field in PASSTHROUGH_FIELDS {
                if let Some(value) = source.get(field).or_else(|| payload.get(field)) {
                    context.insert(field.to_string(), value.clone());
                }
            }
        }

        Self {
            pipeline_id: item.pipeline_id.clone(),
            branch: item.stage.to_string(),
            attempt: item.delivery_attempt,
            reason: verdict.reason,
            processed_output: outcome.output.clone(),
            error,
            timestamp: Utc::now(),
            context,
        }
    }
}

/// Receives stage results once a delivery is acknowledged.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamReporter: Send + Sync {
    /// Sends one report.
    async fn report(&self, output: &ProcessedOutput) -> Result<(), UpstreamError>;
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpUpstreamReporter;

#[async_trait]
impl UpstreamReporter for NoOpUpstreamReporter {
    async fn report(&self, _output: &ProcessedOutput) -> Result<(), UpstreamError> {
        Ok(())
    }
}
