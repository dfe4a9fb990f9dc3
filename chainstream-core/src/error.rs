//! Top-level error taxonomy for chain execution
//!
//! Every failure that can reach a caller of the orchestrator or the chain
//! engine is expressed as an [`ExecutionError`]. The variants carry the
//! breaker and retry policy: configuration problems are fatal and never
//! counted against a provider, vendor failures and timeouts are.

use crate::config::ConfigError;
use crate::jobs::JobStoreError;
use crate::providers::error::ProviderError;
use std::time::Duration;
use thiserror::Error;

/// Result type for orchestration and job operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Errors surfaced by the orchestrator and the chain engine
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// Bad request shape
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Provider name is not registered under any alias
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Missing or unusable provider configuration (credentials, endpoints)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider has no implementation of the requested operation
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The vendor call failed
    #[error("Provider '{provider}' failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    /// The breaker for this provider is open; no vendor call was attempted
    #[error("Circuit open for provider '{provider}', retry in {}ms", .retry_in.as_millis())]
    CircuitOpen { provider: String, retry_in: Duration },

    /// The adaptive timeout elapsed before the call finished
    #[error("Provider '{provider}' timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    /// Message or model format could not be converted for the vendor
    #[error("Message conversion failed: {0}")]
    Conversion(String),

    /// The job store rejected or failed a read/write
    #[error("Job store error: {0}")]
    Store(#[from] JobStoreError),

    /// The job was cancelled while the operation was in flight
    #[error("Job {0} was cancelled")]
    Cancelled(String),
}

impl ExecutionError {
    /// Wrap a provider failure with the provider it came from
    pub fn provider(provider: impl Into<String>, source: ProviderError) -> Self {
        Self::Provider {
            provider: provider.into(),
            source,
        }
    }

    /// Stable snake_case code used in the `error` stream event
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::UnknownProvider(_) => "unknown_provider",
            Self::Configuration(_) => "configuration_error",
            Self::UnsupportedOperation(_) => "unsupported_operation",
            Self::Provider { .. } => "provider_error",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Timeout { .. } => "timeout",
            Self::Conversion(_) => "conversion_error",
            Self::Store(_) => "store_error",
            Self::Cancelled(_) => "cancelled",
        }
    }

    /// Whether this outcome is recorded as a failure by the provider's breaker
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::Timeout { .. })
    }

    /// Fatal errors are never worth retrying with the same request
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Validation(_)
            | Self::UnknownProvider(_)
            | Self::Configuration(_)
            | Self::UnsupportedOperation(_)
            | Self::Conversion(_)
            | Self::Cancelled(_) => true,
            Self::Provider { source, .. } => !source.is_retryable(),
            Self::CircuitOpen { .. } | Self::Timeout { .. } | Self::Store(_) => false,
        }
    }
}

impl From<ConfigError> for ExecutionError {
    fn from(err: ConfigError) -> Self {
        ExecutionError::Configuration(err.to_string())
    }
}
