//! Provider error types and handling

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur when interacting with LLM providers
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ProviderError {
    /// Rate limit exceeded, retry after specified duration
    #[error("Rate limit exceeded{}", .retry_after.map(|d| format!(", retry after {}s", d.as_secs())).unwrap_or_default())]
    RateLimit { retry_after: Option<Duration> },

    /// Request timeout reported by the transport or the vendor
    #[error("Request timeout")]
    Timeout,

    /// Temporary server error (5xx)
    #[error("Server error ({status_code}): {message}")]
    ServerError { status_code: u16, message: String },

    /// Invalid request that should not be retried (4xx)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Authentication failure
    #[error("Authentication failed")]
    AuthenticationError,

    /// Model not available or rejected by the vendor
    #[error("Model '{model}' not available")]
    ModelNotAvailable { model: String },

    /// Generic network error
    #[error("Network error: {message}")]
    NetworkError { message: String },

    /// The event stream broke or carried an undecodable payload
    #[error("Stream error: {message}")]
    Stream { message: String },

    /// Provider-specific error
    #[error("Error [{code}]: {message}")]
    Custom { code: String, message: String },
}

impl ProviderError {
    /// Determine if this error is worth retrying later
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimit { .. } => true,
            Self::Timeout => true,
            Self::ServerError { .. } => true,
            Self::NetworkError { .. } => true,
            Self::Stream { .. } => true,
            Self::ModelNotAvailable { .. } => false,
            Self::InvalidRequest { .. } => false,
            Self::AuthenticationError => false,
            Self::Custom { .. } => false, // Conservative: don't retry custom errors
        }
    }

    /// Get suggested retry delay for this error
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after } => *retry_after,
            Self::Timeout => Some(Duration::from_secs(1)),
            Self::ServerError { .. } => Some(Duration::from_secs(2)),
            Self::NetworkError { .. } => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_connect() {
            ProviderError::NetworkError {
                message: format!("Connection failed: {}", err),
            }
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                401 | 403 => ProviderError::AuthenticationError,
                429 => ProviderError::RateLimit { retry_after: None },
                500..=599 => ProviderError::ServerError {
                    status_code: status.as_u16(),
                    message: err.to_string(),
                },
                _ => ProviderError::Custom {
                    code: status.to_string(),
                    message: err.to_string(),
                },
            }
        } else {
            ProviderError::NetworkError {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Stream {
            message: format!("Failed to parse event payload: {}", err),
        }
    }
}
