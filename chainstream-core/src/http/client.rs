//! HTTP client implementation using reqwest

use crate::config::ConnectionConfig;
use crate::http::error::map_http_error;
use crate::http::VendorRequest;
use crate::providers::error::ProviderError;
use eventsource_stream::{Event, Eventsource};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Client, ClientBuilder};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default user agent
const USER_AGENT: &str = concat!("chainstream/", env!("CARGO_PKG_VERSION"));

/// Stream of parsed server-sent events
pub type SseStream = BoxStream<'static, Result<Event, ProviderError>>;

/// Shared HTTP client with connection pooling
#[derive(Clone)]
pub struct HttpClient {
    /// The underlying reqwest client
    client: Arc<Client>,
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_config(&ConnectionConfig::default())
    }

    /// Create a new HTTP client from connection settings
    ///
    /// No overall request timeout is set on the client: streaming calls are
    /// bounded by the orchestrator's adaptive timeout instead.
    pub fn with_config(config: &ConnectionConfig) -> Result<Self, ProviderError> {
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.keepalive_secs))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::Custom {
                code: "CLIENT_BUILD_ERROR".to_string(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// POST a JSON body and return the response as a server-sent event stream
    pub async fn open_event_stream(&self, request: VendorRequest) -> Result<SseStream, ProviderError> {
        let request_id = request.request_id;
        info!(url = %request.url, %request_id, "Opening event stream");

        let mut builder = self
            .client
            .post(&request.url)
            .header("Accept", "text/event-stream")
            .header("X-Request-ID", request_id.to_string())
            .json(&request.body);

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!(%request_id, "Request timeout");
                ProviderError::Timeout
            } else if e.is_connect() {
                error!(%request_id, error = %e, "Connection error");
                ProviderError::NetworkError {
                    message: format!("Connection failed: {} [request_id: {}]", e, request_id),
                }
            } else {
                error!(%request_id, error = %e, "Request error");
                ProviderError::NetworkError {
                    message: format!("{} [request_id: {}]", e, request_id),
                }
            }
        })?;

        let status = response.status();
        debug!(%status, %request_id, "Response status");

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(crate::http::error::parse_retry_after);
            let body = response.text().await.ok();
            warn!(%status, %request_id, "Stream request failed");
            return Err(map_http_error(status, body, retry_after, request_id));
        }

        let events = response
            .bytes_stream()
            .eventsource()
            .map(move |item| {
                item.map_err(|e| ProviderError::Stream {
                    message: format!("{} [request_id: {}]", e, request_id),
                })
            });

        Ok(Box::pin(events))
    }
}
