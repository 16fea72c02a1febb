//! Retry policies and their per-stage lookup table.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use super::BackoffPolicy;
use crate::core::{StageId, WorkItem};
use crate::errors::ConfigError;

/// Default number of deliveries allowed per stage.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// What a retryable failure within budget does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// NACK so the broker redelivers the same stage.
    #[default]
    RetryStage,
    /// ACK and re-enqueue the run from its first stage.
    RestartPipeline,
}

impl fmt::Display for RetryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryStage => write!(f, "retry_stage"),
            Self::RestartPipeline => write!(f, "restart_pipeline"),
        }
    }
}

/// Retry behaviour for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Deliveries allowed before a retryable failure is abandoned.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Redelivery delay bounds.
    #[serde(default)]
    pub backoff: BackoffPolicy,
    /// Stage retry or whole-run restart.
    #[serde(default)]
    pub mode: RetryMode,
    /// Execution budget override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_timeout_ms: Option<u64>,
    /// First stage of the run, used by [`RetryMode::RestartPipeline`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_from: Option<StageId>,
}

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            mode: RetryMode::RetryStage,
            execution_timeout_ms: None,
            restart_from: None,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the retry mode.
    #[must_use]
    pub fn with_mode(mut self, mode: RetryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the execution budget override.
    #[must_use]
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the stage a restart re-enqueues.
    #[must_use]
    pub fn with_restart_from(mut self, stage: StageId) -> Self {
        self.restart_from = Some(stage);
        self
    }

    /// Returns the attempt number compared against `max_attempts`.
    ///
    /// Stage retries count broker deliveries. Restarts count runs, so a
    /// redelivery inside one run does not spend restart budget. A restart
    /// policy with no `restart_from` behaves as a stage retry and counts
    /// deliveries too.
    #[must_use]
    pub fn effective_attempt(&self, item: &WorkItem) -> u32 {
        match (self.mode, &self.restart_from) {
            (RetryMode::RestartPipeline, Some(_)) => item.restarts.saturating_add(1),
            _ => item.delivery_attempt,
        }
    }

    /// Returns true for a restart policy that does not yet know where a run
    /// begins.
    #[must_use]
    pub fn lacks_restart_target(&self) -> bool {
        self.mode == RetryMode::RestartPipeline && self.restart_from.is_none()
    }

    /// Returns the execution budget, never exceeding `ceiling`.
    #[must_use]
    pub fn execution_budget(&self, ceiling: Duration) -> Duration {
        self.execution_timeout_ms
            .map_or(ceiling, |ms| Duration::from_millis(ms).min(ceiling))
    }

    /// Checks the policy for unusable values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if self.execution_timeout_ms == Some(0) {
            return Err(ConfigError::invalid(
                "execution_timeout_ms",
                "must be greater than zero",
            ));
        }
        self.backoff.validate()
    }
}

/// Per-stage retry policies with a default fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTable {
    /// Policy for stages without an override.
    #[serde(default)]
    pub default: RetryPolicy,
    /// Per-stage overrides.
    #[serde(default)]
    pub stages: BTreeMap<StageId, RetryPolicy>,
}

impl PolicyTable {
    /// Creates a table holding only the given default.
    #[must_use]
    pub fn new(default: RetryPolicy) -> Self {
        Self {
            default,
            stages: BTreeMap::new(),
        }
    }

    /// Adds a per-stage override.
    #[must_use]
    pub fn with_stage(mut self, stage: StageId, policy: RetryPolicy) -> Self {
        self.stages.insert(stage, policy);
        self
    }

    /// Returns the policy for a stage.
    #[must_use]
    pub fn for_stage(&self, stage: &StageId) -> &RetryPolicy {
        self.stages.get(stage).unwrap_or(&self.default)
    }

    /// Fills `restart_from` on every restart policy that lacks one.
    pub fn set_restart_stage(&mut self, first: &StageId) {
        for policy in std::iter::once(&mut self.default).chain(self.stages.values_mut()) {
            if policy.lacks_restart_target() {
                policy.restart_from = Some(first.clone());
            }
        }
    }

    /// Returns every policy in the table, default first.
    pub fn policies(&self) -> impl Iterator<Item = &RetryPolicy> {
        std::iter::once(&self.default).chain(self.stages.values())
    }

    /// Returns the stages restart policies re-enqueue.
    #[must_use]
    pub fn restart_targets(&self) -> BTreeSet<&StageId> {
        self.policies()
            .filter(|p| p.mode == RetryMode::RestartPipeline)
            .filter_map(|p| p.restart_from.as_ref())
            .collect()
    }

    /// Validates every policy in the table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default.validate()?;
        for (stage, policy) in &self.stages {
            policy.validate().map_err(|e| match e {
                ConfigError::InvalidValue { key, reason } => {
                    ConfigError::invalid(format!("stages.{stage}.{key}"), reason)
                }
                other => other,
            })?;
        }
        Ok(())
    }
}
