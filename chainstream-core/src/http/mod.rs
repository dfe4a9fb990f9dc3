//! HTTP client module for streaming calls to LLM providers
//!
//! This module implements the HTTP layer, handling:
//! - Connection pooling and client management
//! - Opening server-sent event streams
//! - Error mapping and retry hints
//! - Request ID correlation

pub mod client;
pub mod error;

pub use client::{HttpClient, SseStream};
pub use error::map_http_error;

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// A fully resolved vendor request
#[derive(Debug, Clone)]
pub struct VendorRequest {
    /// Absolute URL
    pub url: String,

    /// Headers, including credentials
    pub headers: HashMap<String, String>,

    /// JSON body
    pub body: Value,

    /// Unique request ID for correlation
    pub request_id: Uuid,

    /// Optional per-request timeout
    pub timeout: Option<Duration>,
}

impl VendorRequest {
    /// Create a new request with a generated request ID
    pub fn new(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            body,
            request_id: Uuid::new_v4(),
            timeout: None,
        }
    }

    /// Add a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the request ID
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }
}
