//! Streaming model backed by a vendor HTTP API
//!
//! Vendors differ only in how a [`ModelCall`] becomes a request body and
//! how their server-sent events decode into [`ModelEvent`]s. Both halves
//! live behind [`WireDialect`]; the transport is shared.

use super::adapter::{LanguageModel, ModelCall, ModelEvent, ModelEventStream};
use super::error::{ProviderError, ProviderResult};
use crate::error::{ExecutionError, ExecutionResult};
use crate::http::{HttpClient, VendorRequest};
use async_trait::async_trait;
use eventsource_stream::Event;
use futures::StreamExt;
use std::sync::Arc;
use tracing::debug;

/// Request encoding and stream decoding for one vendor API
pub trait WireDialect: Send + Sync {
    /// Build the HTTP request for a call
    fn build_request(&self, model_id: &str, call: &ModelCall) -> ExecutionResult<VendorRequest>;

    /// Fresh decoder for one response stream
    fn decoder(&self) -> Box<dyn StreamDecoder>;
}

/// Stateful decoder for one vendor event stream
pub trait StreamDecoder: Send {
    /// Decode one server-sent event into zero or more model events
    fn decode(&mut self, event: &Event) -> ProviderResult<Vec<ModelEvent>>;

    /// Flush buffered events once the vendor closes the stream
    ///
    /// Fails when the stream closed before the vendor signalled completion.
    fn finish(&mut self) -> ProviderResult<Vec<ModelEvent>>;
}

/// [`LanguageModel`] that streams over HTTP using a vendor dialect
pub struct HttpLanguageModel {
    provider: String,
    model_id: String,
    http: HttpClient,
    dialect: Arc<dyn WireDialect>,
}

impl HttpLanguageModel {
    pub fn new(
        provider: impl Into<String>,
        model_id: impl Into<String>,
        http: HttpClient,
        dialect: Arc<dyn WireDialect>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
            http,
            dialect,
        }
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn stream(&self, call: ModelCall) -> ExecutionResult<ModelEventStream> {
        let request = self
            .dialect
            .build_request(&self.model_id, &call)?
            .with_request_id(call.request_id);

        let mut sse = self
            .http
            .open_event_stream(request)
            .await
            .map_err(|e| ExecutionError::provider(self.provider.clone(), e))?;

        let mut decoder = self.dialect.decoder();
        let provider = self.provider.clone();

        let events = async_stream::stream! {
            while let Some(item) = sse.next().await {
                let event = match item {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                match decoder.decode(&event) {
                    Ok(decoded) => {
                        for model_event in decoded {
                            yield Ok(model_event);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            debug!(provider = %provider, "Vendor stream closed");
            match decoder.finish() {
                Ok(decoded) => {
                    for model_event in decoded {
                        yield Ok(model_event);
                    }
                }
                Err(e) => yield Err(e),
            }
        };

        Ok(events.boxed())
    }
}

/// Parse an event payload as JSON
pub(crate) fn parse_data<T: serde::de::DeserializeOwned>(event: &Event) -> ProviderResult<T> {
    serde_json::from_str(&event.data).map_err(|e| ProviderError::Stream {
        message: format!("invalid event payload: {}", e),
    })
}

/// Stream ended without the vendor's completion signal
pub(crate) fn truncated_stream() -> ProviderError {
    ProviderError::Stream {
        message: "stream ended before the model finished".to_string(),
    }
}
