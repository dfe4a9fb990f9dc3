//! Configuration schema structures with serde support

use super::error::{ValidationError, ValidationErrorKind};
use super::secrets::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Supported schema version
pub const SCHEMA_VERSION: &str = "0.1";

/// Root configuration structure for the engine
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Schema version (required - no default)
    pub version: String,

    /// Per-provider credentials and endpoints
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Provider circuit breaker tuning
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Adaptive timeout table
    #[serde(default)]
    pub timeouts: TimeoutSettings,

    /// Chain job execution settings
    #[serde(default)]
    pub jobs: JobSettings,

    /// Settings resolver cache
    #[serde(default)]
    pub settings: SettingsCacheConfig,

    /// Global connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            providers: Vec::new(),
            circuit_breaker: CircuitBreakerSettings::default(),
            timeouts: TimeoutSettings::default(),
            jobs: JobSettings::default(),
            settings: SettingsCacheConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Provider credentials and endpoint overrides
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Provider name as registered (openai, anthropic, google, ...)
    pub name: String,

    /// API key (supports environment variable interpolation)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<SecretString>,

    /// Base URL override for the provider API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Deployment region, for providers hosted on cloud platforms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Whether this provider is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Circuit breaker tuning shared by every provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time the circuit stays open before a probe is allowed
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout(),
        }
    }
}

/// Timeout table used to pick a per-call deadline
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutSettings {
    /// Timeout when the model has no special capabilities
    #[serde(default = "default_base_timeout")]
    pub base_ms: u64,

    /// Timeout for reasoning models
    #[serde(default = "default_reasoning_timeout")]
    pub reasoning_ms: u64,

    /// Timeout for models with extended thinking
    #[serde(default = "default_thinking_timeout")]
    pub thinking_ms: u64,

    /// Timeout for the heavy reasoning families
    #[serde(default = "default_heavy_timeout")]
    pub heavy_reasoning_ms: u64,

    /// Model id patterns treated as heavy reasoning
    #[serde(default = "default_heavy_patterns")]
    pub heavy_reasoning_patterns: Vec<String>,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            base_ms: default_base_timeout(),
            reasoning_ms: default_reasoning_timeout(),
            thinking_ms: default_thinking_timeout(),
            heavy_reasoning_ms: default_heavy_timeout(),
            heavy_reasoning_patterns: default_heavy_patterns(),
        }
    }
}

/// What the chain engine does when a job store write fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Abort the run with a store error
    Propagate,
    /// Log the failure and continue with in-memory state
    #[default]
    BestEffort,
}

/// Chain job execution settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JobSettings {
    /// Store write failure handling
    #[serde(default)]
    pub store_failure_policy: StoreFailurePolicy,

    /// Suggested poll interval while a job is pending
    #[serde(default = "default_poll_pending")]
    pub poll_pending_ms: u64,

    /// Suggested poll interval while a job is processing
    #[serde(default = "default_poll_processing")]
    pub poll_processing_ms: u64,

    /// Suggested poll interval while a job is streaming
    #[serde(default = "default_poll_streaming")]
    pub poll_streaming_ms: u64,

    /// Upper bound for backed-off poll intervals
    #[serde(default = "default_poll_max")]
    pub poll_max_ms: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            store_failure_policy: StoreFailurePolicy::default(),
            poll_pending_ms: default_poll_pending(),
            poll_processing_ms: default_poll_processing(),
            poll_streaming_ms: default_poll_streaming(),
            poll_max_ms: default_poll_max(),
        }
    }
}

/// Settings resolver cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsCacheConfig {
    /// How long a resolved provider entry is reused
    #[serde(default = "default_settings_ttl")]
    pub ttl_ms: u64,
}

impl Default for SettingsCacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_settings_ttl(),
        }
    }
}

/// Connection settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Maximum idle connections per host
    #[serde(default = "default_max_idle")]
    pub max_idle_per_host: usize,

    /// Keep-alive timeout in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            max_idle_per_host: default_max_idle(),
            keepalive_secs: default_keepalive(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout() -> u64 {
    60_000
}
fn default_base_timeout() -> u64 {
    30_000
}
fn default_reasoning_timeout() -> u64 {
    60_000
}
fn default_thinking_timeout() -> u64 {
    120_000
}
fn default_heavy_timeout() -> u64 {
    300_000
}
fn default_heavy_patterns() -> Vec<String> {
    ["o1*", "o3*", "o4*", "gpt-5*", "*deepseek-r1*", "*claude-opus-4*"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}
fn default_poll_pending() -> u64 {
    2_000
}
fn default_poll_processing() -> u64 {
    3_000
}
fn default_poll_streaming() -> u64 {
    1_500
}
fn default_poll_max() -> u64 {
    30_000
}
fn default_settings_ttl() -> u64 {
    30_000
}
fn default_connect_timeout() -> u64 {
    10_000
}
fn default_max_idle() -> usize {
    10
}
fn default_keepalive() -> u64 {
    90
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version != SCHEMA_VERSION {
            return Err(ValidationError::new(
                "version",
                ValidationErrorKind::UnsupportedVersion {
                    expected: SCHEMA_VERSION.to_string(),
                    actual: self.version.clone(),
                },
            ));
        }

        let mut seen = HashSet::new();
        for (i, provider) in self.providers.iter().enumerate() {
            provider.validate(&format!("providers[{}]", i))?;
            if !seen.insert(provider.name.to_ascii_lowercase()) {
                return Err(ValidationError::new(
                    format!("providers[{}].name", i),
                    ValidationErrorKind::DuplicateProvider {
                        name: provider.name.clone(),
                    },
                ));
            }
        }

        self.circuit_breaker.validate()?;
        self.timeouts.validate()?;
        self.jobs.validate()?;
        Ok(())
    }
}

impl ProviderConfig {
    /// Validate provider configuration
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new(
                format!("{}.name", path),
                ValidationErrorKind::Empty,
            ));
        }

        if let Some(base_url) = &self.base_url {
            if let Err(e) = url::Url::parse(base_url) {
                return Err(ValidationError::new(
                    format!("{}.base_url", path),
                    ValidationErrorKind::InvalidUrl {
                        message: e.to_string(),
                    },
                ));
            }
        }

        if self.api_key.as_ref().is_some_and(SecretString::is_empty) {
            return Err(ValidationError::new(
                format!("{}.api_key", path),
                ValidationErrorKind::EmptySecret,
            ));
        }

        Ok(())
    }
}

impl CircuitBreakerSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.failure_threshold == 0 {
            return Err(ValidationError::not_positive(
                "circuit_breaker.failure_threshold",
            ));
        }
        if self.recovery_timeout_ms == 0 {
            return Err(ValidationError::not_positive(
                "circuit_breaker.recovery_timeout_ms",
            ));
        }
        Ok(())
    }
}

impl TimeoutSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        let entries = [
            ("timeouts.base_ms", self.base_ms),
            ("timeouts.reasoning_ms", self.reasoning_ms),
            ("timeouts.thinking_ms", self.thinking_ms),
            ("timeouts.heavy_reasoning_ms", self.heavy_reasoning_ms),
        ];
        for (field, value) in entries {
            if value == 0 {
                return Err(ValidationError::not_positive(field));
            }
        }
        Ok(())
    }
}

impl JobSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        let entries = [
            ("jobs.poll_pending_ms", self.poll_pending_ms),
            ("jobs.poll_processing_ms", self.poll_processing_ms),
            ("jobs.poll_streaming_ms", self.poll_streaming_ms),
        ];
        for (field, value) in entries {
            if value == 0 {
                return Err(ValidationError::not_positive(field));
            }
            if value > self.poll_max_ms {
                return Err(ValidationError::new(
                    field,
                    ValidationErrorKind::IntervalAboveCap {
                        cap_ms: self.poll_max_ms,
                    },
                ));
            }
        }
        Ok(())
    }
}
