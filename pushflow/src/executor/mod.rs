//! Stage executor trait and implementations.
//!
//! Executors are the black boxes that do a stage's actual work (speech to
//! text, analysis, ...). The coordinator only sees the outcome.

#[cfg(feature = "http-client")]
mod http;
mod registry;

#[cfg(feature = "http-client")]
pub use http::HttpExecutor;
pub use registry::StageRegistry;

use crate::core::{StageId, StageOutcome, WorkItem};
use crate::errors::StageExecutionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;

/// Result type returned by executors.
pub type ExecutionResult = Result<StageOutcome, StageExecutionError>;

/// Trait for pipeline stage executors.
///
/// Deliveries are at-least-once, so an executor may see the same
/// `pipeline_id` and stage more than once, possibly concurrently. It must
/// be idempotent or deduplicate on [`WorkItem::idempotency_key`].
#[async_trait]
pub trait StageExecutor: Send + Sync + Debug {
    /// Returns the stage this executor handles.
    fn stage(&self) -> &StageId;

    /// Executes the stage for one delivery.
    ///
    /// Explicit failures are returned as `Err` with the retryable flag set
    /// by the executor, or as a failure outcome.
    async fn execute(&self, item: &WorkItem) -> ExecutionResult;
}

/// Remote endpoint that runs a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// URL the work item is posted to.
    pub url: String,
    /// Bearer token sent with every call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

impl EndpointConfig {
    /// Creates an endpoint without authentication.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bearer_token: None,
        }
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// An executor backed by an async closure.
pub struct FnExecutor<F, Fut>
where
    F: Fn(WorkItem) -> Fut + Send + Sync,
    Fut: Future<Output = ExecutionResult> + Send,
{
    stage: StageId,
    func: F,
    _phantom: std::marker::PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnExecutor<F, Fut>
where
    F: Fn(WorkItem) -> Fut + Send + Sync,
    Fut: Future<Output = ExecutionResult> + Send,
{
    /// Creates a new closure-based executor.
    pub fn new(stage: StageId, func: F) -> Self {
        Self {
            stage,
            func,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<F, Fut> Debug for FnExecutor<F, Fut>
where
    F: Fn(WorkItem) -> Fut + Send + Sync,
    Fut: Future<Output = ExecutionResult> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExecutor")
            .field("stage", &self.stage)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> StageExecutor for FnExecutor<F, Fut>
where
    F: Fn(WorkItem) -> Fut + Send + Sync,
    Fut: Future<Output = ExecutionResult> + Send,
{
    fn stage(&self) -> &StageId {
        &self.stage
    }

    async fn execute(&self, item: &WorkItem) -> ExecutionResult {
        (self.func)(item.clone()).await
    }
}
