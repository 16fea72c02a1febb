//! Service configuration.
//!
//! Settings come from an optional JSON file, then from environment
//! variables, then from command line flags, each layer overriding the last.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use crate::core::StageId;
use crate::dispatch::PipelineLayout;
use crate::enqueue::PublisherConfig;
use crate::executor::EndpointConfig;
use crate::errors::ConfigError;
use crate::observability::LogFormat;
use crate::retry::{PolicyTable, RetryPolicy};

/// Deployment environment name.
pub const ENV_APP_ENV: &str = "APP_ENV";
/// Log level filter.
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
/// Listen address.
pub const ENV_BIND_ADDR: &str = "BIND_ADDR";
/// Base URL of the upstream result service.
pub const ENV_UPSTREAM_URL: &str = "UPSTREAM_URL";
/// Attempt budget of the default retry policy.
pub const ENV_MAX_ATTEMPTS: &str = "MAX_PIPELINE_STAGE_ATTEMPTS";
/// Broker acknowledgement deadline.
pub const ENV_ACK_DEADLINE_SECS: &str = "ACK_DEADLINE_SECS";
/// Backoff floor of the default retry policy.
pub const ENV_MIN_BACKOFF_SECS: &str = "MIN_BACKOFF_SECS";
/// Backoff ceiling of the default retry policy.
pub const ENV_MAX_BACKOFF_SECS: &str = "MAX_BACKOFF_SECS";

/// Configuration for the push endpoint service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Deployment environment, e.g. `development` or `production`.
    #[serde(default = "default_app_env")]
    pub app_env: String,
    /// Log level filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format; derived from `app_env` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,
    /// Address the HTTP server listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Base URL of the upstream result service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_url: Option<String>,
    /// Timeout for upstream result callbacks in milliseconds.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,
    /// Broker acknowledgement deadline in seconds.
    #[serde(default = "default_ack_deadline_secs")]
    pub ack_deadline_secs: u64,
    /// Time reserved for answering the broker, in milliseconds.
    #[serde(default = "default_safety_margin_ms")]
    pub safety_margin_ms: u64,
    /// Retry policies.
    #[serde(default)]
    pub retry: PolicyTable,
    /// Ordered stages of a run.
    #[serde(default = "default_layout")]
    pub layout: Option<PipelineLayout>,
    /// Extra push routes bound to a fixed stage.
    #[serde(default = "default_routes")]
    pub routes: BTreeMap<String, StageId>,
    /// Follow-up publishing.
    #[serde(default)]
    pub publisher: PublisherConfig,
    /// Remote endpoint per stage.
    #[serde(default)]
    pub executors: BTreeMap<StageId, EndpointConfig>,
}

fn default_app_env() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

const fn default_upstream_timeout_ms() -> u64 {
    5_000
}

const fn default_ack_deadline_secs() -> u64 {
    10
}

const fn default_safety_margin_ms() -> u64 {
    1_000
}

#[allow(clippy::unnecessary_wraps)]
fn default_layout() -> Option<PipelineLayout> {
    Some(PipelineLayout::speech())
}

fn default_routes() -> BTreeMap<String, StageId> {
    BTreeMap::from([
        ("/stt-branch-subscription".to_string(), StageId::stt()),
        ("/smart-branch-subscription".to_string(), StageId::smart()),
    ])
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            app_env: default_app_env(),
            log_level: default_log_level(),
            log_format: None,
            bind_addr: default_bind_addr(),
            upstream_url: None,
            upstream_timeout_ms: default_upstream_timeout_ms(),
            ack_deadline_secs: default_ack_deadline_secs(),
            safety_margin_ms: default_safety_margin_ms(),
            retry: PolicyTable::default(),
            layout: default_layout(),
            routes: default_routes(),
            publisher: PublisherConfig::default(),
            executors: BTreeMap::new(),
        }
    }
}

impl ServiceConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an environment lookup.
    ///
    /// Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get(ENV_APP_ENV) {
            self.app_env = v;
        }
        if let Some(v) = get(ENV_LOG_LEVEL) {
            self.log_level = v.to_ascii_lowercase();
        }
        if let Some(v) = get(ENV_BIND_ADDR) {
            self.bind_addr = v;
        }
        if let Some(v) = get(ENV_UPSTREAM_URL) {
            self.upstream_url = Some(v);
        }
        if let Some(v) = get(ENV_MAX_ATTEMPTS) {
            self.retry.default.max_attempts = parse_number(ENV_MAX_ATTEMPTS, &v)?;
        }
        if let Some(v) = get(ENV_ACK_DEADLINE_SECS) {
            self.ack_deadline_secs = parse_number(ENV_ACK_DEADLINE_SECS, &v)?;
        }
        if let Some(v) = get(ENV_MIN_BACKOFF_SECS) {
            let secs: u64 = parse_number(ENV_MIN_BACKOFF_SECS, &v)?;
            self.retry.default.backoff.floor_ms = secs.saturating_mul(1_000);
        }
        if let Some(v) = get(ENV_MAX_BACKOFF_SECS) {
            let secs: u64 = parse_number(ENV_MAX_BACKOFF_SECS, &v)?;
            self.retry.default.backoff.ceiling_ms = secs.saturating_mul(1_000);
        }
        Ok(())
    }

    /// Sets the listen address.
    #[must_use]
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Sets the upstream base URL.
    #[must_use]
    pub fn with_upstream_url(mut self, url: impl Into<String>) -> Self {
        self.upstream_url = Some(url.into());
        self
    }

    /// Sets the retry policies.
    #[must_use]
    pub fn with_retry(mut self, retry: PolicyTable) -> Self {
        self.retry = retry;
        self
    }

    /// Sets or clears the pipeline layout.
    #[must_use]
    pub fn with_layout(mut self, layout: Option<PipelineLayout>) -> Self {
        self.layout = layout;
        self
    }

    /// Returns the effective log format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
            .unwrap_or_else(|| LogFormat::for_environment(&self.app_env))
    }

    /// Returns the broker acknowledgement deadline.
    #[must_use]
    pub const fn ack_deadline(&self) -> Duration {
        Duration::from_secs(self.ack_deadline_secs)
    }

    /// Returns the longest a stage may run: the ack deadline minus the
    /// safety margin.
    #[must_use]
    pub fn execution_ceiling(&self) -> Duration {
        self.ack_deadline()
            .saturating_sub(Duration::from_millis(self.safety_margin_ms))
    }

    /// Returns the upstream callback timeout.
    #[must_use]
    pub const fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ack_deadline_secs == 0 {
            return Err(ConfigError::invalid("ack_deadline_secs", "must be greater than zero"));
        }
        if self.execution_ceiling().is_zero() {
            return Err(ConfigError::invalid(
                "safety_margin_ms",
                format!(
                    "{}ms leaves no execution time within the {}s ack deadline",
                    self.safety_margin_ms, self.ack_deadline_secs
                ),
            ));
        }
        if let Some(ref url) = self.upstream_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::invalid(
                    "upstream_url",
                    format!("'{url}' is not an http(s) URL"),
                ));
            }
        }
        for path in self.routes.keys() {
            if !path.starts_with('/') || path == "/health" || path.starts_with("/push/") {
                return Err(ConfigError::invalid(
                    "routes",
                    format!("'{path}' is not a usable route path"),
                ));
            }
        }
        for (stage, endpoint) in &self.executors {
            if !(endpoint.url.starts_with("http://") || endpoint.url.starts_with("https://")) {
                return Err(ConfigError::invalid(
                    format!("executors.{stage}.url"),
                    format!("'{}' is not an http(s) URL", endpoint.url),
                ));
            }
        }
        if self.layout.is_none() && self.retry.policies().any(RetryPolicy::lacks_restart_target) {
            return Err(ConfigError::invalid(
                "retry",
                "restart_pipeline mode needs a layout or an explicit restart_from",
            ));
        }
        self.retry.validate()?;
        self.publisher.validate()
    }

    /// Returns every stage a follow-up may be published to: layout stages
    /// after the first, plus restart targets.
    #[must_use]
    pub fn follow_up_stages(&self) -> BTreeSet<StageId> {
        let mut policies = self.retry.clone();
        let mut stages = BTreeSet::new();
        if let Some(ref layout) = self.layout {
            policies.set_restart_stage(layout.first());
            stages.extend(layout.stages().iter().skip(1).cloned());
        }
        stages.extend(policies.restart_targets().into_iter().cloned());
        stages
    }

    /// Checks that every follow-up stage has a publish topic.
    ///
    /// A service that cannot publish its follow-ups must not start: the
    /// current stage would be ACKed and the next one lost.
    pub fn validate_publishing(&self) -> Result<(), ConfigError> {
        let missing: Vec<String> = self
            .follow_up_stages()
            .into_iter()
            .filter(|stage| !self.publisher.topics.contains_key(stage))
            .map(|stage| stage.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::invalid(
                "publisher.topics",
                format!("no topic for follow-up stage(s): {}", missing.join(", ")),
            ))
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::invalid(key, format!("'{raw}' is not a valid number")))
}
