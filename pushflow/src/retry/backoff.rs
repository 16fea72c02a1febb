//! Backoff delay computation.
//!
//! The coordinator never sleeps. It only computes the delay hint returned
//! with a NACK; the broker owns the actual redelivery timing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ConfigError;

/// Default lower bound for a redelivery delay.
pub const DEFAULT_FLOOR_MS: u64 = 1_000;
/// Default upper bound for a redelivery delay.
pub const DEFAULT_CEILING_MS: u64 = 3_000;

/// Growth strategy for redelivery delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = floor * 2^(attempt - 1)
    #[default]
    Exponential,
    /// delay = floor * attempt
    Linear,
    /// delay = floor
    Constant,
}

/// Bounds and growth strategy for redelivery delays.
///
/// Delays are clamped to `[floor, ceiling]` and never decrease as the
/// attempt number grows. No jitter is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Minimum delay in milliseconds.
    #[serde(default = "default_floor_ms")]
    pub floor_ms: u64,
    /// Maximum delay in milliseconds.
    #[serde(default = "default_ceiling_ms")]
    pub ceiling_ms: u64,
    /// Growth strategy.
    #[serde(default)]
    pub strategy: BackoffStrategy,
}

const fn default_floor_ms() -> u64 {
    DEFAULT_FLOOR_MS
}

const fn default_ceiling_ms() -> u64 {
    DEFAULT_CEILING_MS
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            floor_ms: DEFAULT_FLOOR_MS,
            ceiling_ms: DEFAULT_CEILING_MS,
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy with the default bounds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lower bound.
    #[must_use]
    pub fn with_floor(mut self, floor: Duration) -> Self {
        self.floor_ms = duration_ms(floor);
        self
    }

    /// Sets the upper bound.
    #[must_use]
    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling_ms = duration_ms(ceiling);
        self
    }

    /// Sets the growth strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Returns the lower bound.
    #[must_use]
    pub const fn floor(&self) -> Duration {
        Duration::from_millis(self.floor_ms)
    }

    /// Returns the upper bound.
    #[must_use]
    pub const fn ceiling(&self) -> Duration {
        Duration::from_millis(self.ceiling_ms)
    }

    /// Checks that the bounds are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.floor_ms == 0 {
            return Err(ConfigError::invalid("backoff.floor_ms", "must be greater than zero"));
        }
        if self.ceiling_ms < self.floor_ms {
            return Err(ConfigError::invalid(
                "backoff.ceiling_ms",
                format!(
                    "ceiling {}ms is below floor {}ms",
                    self.ceiling_ms, self.floor_ms
                ),
            ));
        }
        Ok(())
    }

    /// Computes the delay hint for a 1-based delivery attempt.
    ///
    /// Attempt 0 is treated as attempt 1.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let step = attempt.saturating_sub(1);
        let raw = match self.strategy {
            BackoffStrategy::Exponential => {
                let factor = 2u64.checked_pow(step).unwrap_or(u64::MAX);
                self.floor_ms.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.floor_ms.saturating_mul(u64::from(step) + 1),
            BackoffStrategy::Constant => self.floor_ms,
        };
        // max() last so an inverted range still honours the floor.
        Duration::from_millis(raw.min(self.ceiling_ms).max(self.floor_ms))
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
