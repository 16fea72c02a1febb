//! Mock stage executors for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

use crate::core::{StageId, StageOutcome, WorkItem};
use crate::errors::StageExecutionError;
use crate::executor::{ExecutionResult, StageExecutor};

/// An executor that counts calls and returns a configurable outcome.
#[derive(Debug)]
pub struct MockExecutor {
    stage: StageId,
    outcome: Mutex<StageOutcome>,
    call_count: Mutex<usize>,
}

impl MockExecutor {
    /// Creates a mock that completes the run.
    #[must_use]
    pub fn new(stage: StageId) -> Self {
        Self {
            stage,
            outcome: Mutex::new(StageOutcome::success()),
            call_count: Mutex::new(0),
        }
    }

    /// Sets the outcome to return, builder style.
    #[must_use]
    pub fn with_outcome(self, outcome: StageOutcome) -> Self {
        *self.outcome.lock() = outcome;
        self
    }

    /// Sets the outcome to return.
    pub fn set_outcome(&self, outcome: StageOutcome) {
        *self.outcome.lock() = outcome;
    }

    /// Returns the number of times the executor was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl StageExecutor for MockExecutor {
    fn stage(&self) -> &StageId {
        &self.stage
    }

    async fn execute(&self, _item: &WorkItem) -> ExecutionResult {
        *self.call_count.lock() += 1;
        Ok(self.outcome.lock().clone())
    }
}

/// An executor that always returns an error.
#[derive(Debug)]
pub struct FailingExecutor {
    stage: StageId,
    error: StageExecutionError,
}

impl FailingExecutor {
    /// Creates an executor failing with a retryable error.
    #[must_use]
    pub fn transient(stage: StageId, message: impl Into<String>) -> Self {
        Self {
            stage,
            error: StageExecutionError::transient(message),
        }
    }

    /// Creates an executor failing with a non-retryable error.
    #[must_use]
    pub fn fatal(stage: StageId, message: impl Into<String>) -> Self {
        Self {
            stage,
            error: StageExecutionError::fatal(message),
        }
    }
}

#[async_trait]
impl StageExecutor for FailingExecutor {
    fn stage(&self) -> &StageId {
        &self.stage
    }

    async fn execute(&self, _item: &WorkItem) -> ExecutionResult {
        Err(self.error.clone())
    }
}

/// An executor that sleeps before succeeding.
#[derive(Debug)]
pub struct SlowExecutor {
    stage: StageId,
    delay: Duration,
}

impl SlowExecutor {
    /// Creates a slow executor with a delay in milliseconds.
    #[must_use]
    pub fn new(stage: StageId, delay_ms: u64) -> Self {
        Self {
            stage,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

#[async_trait]
impl StageExecutor for SlowExecutor {
    fn stage(&self) -> &StageId {
        &self.stage
    }

    async fn execute(&self, _item: &WorkItem) -> ExecutionResult {
        tokio::time::sleep(self.delay).await;
        Ok(StageOutcome::success())
    }
}

/// An executor that panics.
#[derive(Debug)]
pub struct PanickingExecutor {
    stage: StageId,
    message: String,
}

impl PanickingExecutor {
    /// Creates an executor that panics with `message`.
    #[must_use]
    pub fn new(stage: StageId, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

#[async_trait]
impl StageExecutor for PanickingExecutor {
    fn stage(&self) -> &StageId {
        &self.stage
    }

    async fn execute(&self, _item: &WorkItem) -> ExecutionResult {
        panic!("{}", self.message);
    }
}

/// An executor that records every work item and replays scripted results.
///
/// Scripted results are consumed in order; once they run out the executor
/// returns its fallback outcome.
#[derive(Debug)]
pub struct RecordingExecutor {
    stage: StageId,
    script: Mutex<VecDeque<ExecutionResult>>,
    fallback: StageOutcome,
    items: Mutex<Vec<WorkItem>>,
}

impl RecordingExecutor {
    /// Creates a recording executor that completes the run.
    #[must_use]
    pub fn new(stage: StageId) -> Self {
        Self {
            stage,
            script: Mutex::new(VecDeque::new()),
            fallback: StageOutcome::success(),
            items: Mutex::new(Vec::new()),
        }
    }

    /// Sets the outcome returned once the script is exhausted.
    #[must_use]
    pub fn with_fallback(mut self, outcome: StageOutcome) -> Self {
        self.fallback = outcome;
        self
    }

    /// Appends a scripted result.
    #[must_use]
    pub fn then(self, result: ExecutionResult) -> Self {
        self.script.lock().push_back(result);
        self
    }

    /// Returns every work item seen, in call order.
    #[must_use]
    pub fn items(&self) -> Vec<WorkItem> {
        self.items.lock().clone()
    }

    /// Returns the number of executions.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.items.lock().len()
    }
}

#[async_trait]
impl StageExecutor for RecordingExecutor {
    fn stage(&self) -> &StageId {
        &self.stage
    }

    async fn execute(&self, item: &WorkItem) -> ExecutionResult {
        self.items.lock().push(item.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Payload;
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;

    fn item(stage: StageId) -> WorkItem {
        WorkItem::new("p1", stage, Payload::Bytes(vec![]))
    }

    #[tokio::test]
    async fn test_mock_executor() {
        let executor = MockExecutor::new(StageId::stt());
        assert!(executor.execute(&item(StageId::stt())).await.unwrap().is_success());

        executor.set_outcome(StageOutcome::terminal("no"));
        let outcome = executor.execute(&item(StageId::stt())).await.unwrap();
        assert!(!outcome.is_success());
        assert_eq!(executor.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_executor() {
        let transient = FailingExecutor::transient(StageId::stt(), "retry me");
        assert!(transient.execute(&item(StageId::stt())).await.unwrap_err().retryable);

        let fatal = FailingExecutor::fatal(StageId::stt(), "give up");
        assert!(!fatal.execute(&item(StageId::stt())).await.unwrap_err().retryable);
    }

    #[tokio::test]
    async fn test_slow_executor() {
        let executor = SlowExecutor::new(StageId::smart(), 10);
        let start = std::time::Instant::now();
        assert!(executor.execute(&item(StageId::smart())).await.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_panicking_executor() {
        let executor = PanickingExecutor::new(StageId::stt(), "kaboom");
        let item = item(StageId::stt());
        let result = AssertUnwindSafe(executor.execute(&item)).catch_unwind().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_recording_executor_script() {
        let executor = RecordingExecutor::new(StageId::stt())
            .then(Err(StageExecutionError::transient("first")))
            .then(Ok(StageOutcome::retryable("second")));

        assert!(executor.execute(&item(StageId::stt())).await.is_err());
        assert!(executor.execute(&item(StageId::stt())).await.unwrap().is_retryable());
        assert!(executor.execute(&item(StageId::stt())).await.unwrap().is_success());
        assert_eq!(executor.execution_count(), 3);
        assert_eq!(executor.items()[0].pipeline_id, "p1");
    }
}
