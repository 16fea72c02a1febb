//! HTTP upstream reporter.

use async_trait::async_trait;
use std::time::Duration;

use super::{ProcessedOutput, UpstreamReporter};
use crate::errors::UpstreamError;

/// Path appended to the upstream base URL.
pub const PROCESSED_OUTPUT_PATH: &str = "/processed-output";

/// Posts reports to `{base_url}/processed-output`.
#[derive(Debug, Clone)]
pub struct HttpUpstreamReporter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUpstreamReporter {
    /// Creates a reporter for an upstream base URL.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}{PROCESSED_OUTPUT_PATH}", base_url.trim_end_matches('/')),
        })
    }

    /// Returns the URL reports are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl UpstreamReporter for HttpUpstreamReporter {
    async fn report(&self, output: &ProcessedOutput) -> Result<(), UpstreamError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(output)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }
        Ok(())
    }
}
