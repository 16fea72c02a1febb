//! Stage dispatcher.
//!
//! Routes a decoded work item to the executor registered for its stage,
//! runs it once under the stage's execution budget and turns whatever
//! happens into a [`StageOutcome`]. Nothing escapes as an error or a panic.

mod layout;

pub use layout::PipelineLayout;

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use crate::core::{StageOutcome, WorkItem};
use crate::errors::{ErrorKind, StageExecutionError};
use crate::executor::StageRegistry;
use crate::observability::SpanTimer;

/// Routes work items to stage executors.
///
/// Stateless apart from its configuration, so one dispatcher is shared by
/// every in-flight delivery. Concurrent deliveries of the same run are not
/// deduplicated.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: StageRegistry,
    layout: Option<PipelineLayout>,
}

impl Dispatcher {
    /// Creates a dispatcher over a registry.
    #[must_use]
    pub fn new(registry: StageRegistry) -> Self {
        Self {
            registry,
            layout: None,
        }
    }

    /// Sets the pipeline layout used to fill in next stages.
    #[must_use]
    pub fn with_layout(mut self, layout: PipelineLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Returns the registry.
    #[must_use]
    pub const fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Returns the pipeline layout, if configured.
    #[must_use]
    pub const fn layout(&self) -> Option<&PipelineLayout> {
        self.layout.as_ref()
    }

    /// Executes one delivery and classifies the result.
    pub async fn dispatch(&self, item: &WorkItem, budget: Duration) -> StageOutcome {
        let Some(executor) = self.registry.get(&item.stage) else {
            tracing::error!(
                pipeline_id = %item.pipeline_id,
                stage = %item.stage,
                page = true,
                "No executor registered for stage"
            );
            return StageOutcome::terminal(format!("no executor registered for stage '{}'", item.stage))
                .with_error_kind(ErrorKind::UnknownStage);
        };

        let timer = SpanTimer::start(format!("dispatch:{}", item.stage));
        let execution = AssertUnwindSafe(executor.execute(item)).catch_unwind();

        let outcome = match tokio::time::timeout(budget, execution).await {
            Ok(Ok(Ok(outcome))) => outcome,
            Ok(Ok(Err(err))) => {
                tracing::warn!(
                    pipeline_id = %item.pipeline_id,
                    stage = %item.stage,
                    attempt = item.delivery_attempt,
                    retryable = err.retryable,
                    error = %err,
                    "Stage executor failed"
                );
                StageOutcome::from_error(&err)
            }
            Ok(Err(payload)) => {
                let err = StageExecutionError::panicked(&item.stage, panic_message(payload.as_ref()));
                tracing::error!(
                    pipeline_id = %item.pipeline_id,
                    stage = %item.stage,
                    attempt = item.delivery_attempt,
                    error = %err,
                    "Stage executor panicked"
                );
                StageOutcome::from_error(&err)
            }
            Err(_) => {
                let err = StageExecutionError::deadline_exceeded(&item.stage, budget);
                tracing::warn!(
                    pipeline_id = %item.pipeline_id,
                    stage = %item.stage,
                    attempt = item.delivery_attempt,
                    budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                    "Stage execution exceeded its budget"
                );
                StageOutcome::from_error(&err)
            }
        };

        tracing::debug!(
            pipeline_id = %item.pipeline_id,
            stage = %item.stage,
            status = %outcome.status,
            duration_ms = timer.elapsed_ms(),
            "Stage executed"
        );

        self.fill_next_stage(item, outcome)
    }

    fn fill_next_stage(&self, item: &WorkItem, mut outcome: StageOutcome) -> StageOutcome {
        if outcome.is_success() && outcome.next_stage.is_none() {
            if let Some(next) = self.layout.as_ref().and_then(|l| l.next_after(&item.stage)) {
                outcome.next_stage = Some(next.clone());
            }
        }
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
