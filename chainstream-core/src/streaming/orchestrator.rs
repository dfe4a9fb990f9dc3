//! Unified streaming orchestrator
//!
//! One entry point for every provider. A call goes through these steps, in
//! order: resolve the adapter, validate and normalize the request, create
//! the model, compute the adaptive timeout, then issue the vendor call
//! through the provider's circuit breaker. Everything before the breaker
//! fails without touching its counters.

use super::hooks::{report, FinishOutcome, NoopHooks, StreamHooks};
use super::timeout::{AdaptiveTimeout, ResolvedTimeout};
use crate::error::{ExecutionError, ExecutionResult};
use crate::messages::{normalize, validate};
use crate::protocol::events::StreamEvent;
use crate::protocol::types::{FinishReason, StreamRequest, Usage};
use crate::providers::{
    CircuitBreakerRegistry, ModelCall, ModelEvent, ModelOptions, ProviderCapabilities,
    ProviderRegistry,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A started stream and what was resolved to start it
pub struct StreamHandle {
    /// Relayed events; always ends with `finish` or `error`
    pub events: BoxStream<'static, StreamEvent>,
    pub capabilities: ProviderCapabilities,
    pub timeout: ResolvedTimeout,
    pub provider: String,
    pub model_id: String,
    pub request_id: Uuid,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("provider", &self.provider)
            .field("model_id", &self.model_id)
            .field("request_id", &self.request_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Streams model output from any registered provider
pub struct StreamingOrchestrator {
    providers: Arc<ProviderRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    timeouts: AdaptiveTimeout,
}

impl StreamingOrchestrator {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        timeouts: AdaptiveTimeout,
    ) -> Self {
        Self {
            providers,
            breakers,
            timeouts,
        }
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Start a stream without hooks
    pub async fn stream(&self, request: StreamRequest) -> ExecutionResult<StreamHandle> {
        self.execute(request, Arc::new(NoopHooks)).await
    }

    /// Start a stream, reporting progress to `hooks`
    ///
    /// Errors raised before the vendor starts streaming are returned here
    /// and also reported to `on_error`. Later failures arrive as a final
    /// `error` event.
    pub async fn execute(
        &self,
        request: StreamRequest,
        hooks: Arc<dyn StreamHooks>,
    ) -> ExecutionResult<StreamHandle> {
        match self.start(request, hooks.clone()).await {
            Ok(handle) => Ok(handle),
            Err(err) => {
                report("on_error", hooks.on_error(&err).await);
                Err(err)
            }
        }
    }

    async fn start(
        &self,
        request: StreamRequest,
        hooks: Arc<dyn StreamHooks>,
    ) -> ExecutionResult<StreamHandle> {
        let adapter = self
            .providers
            .resolve_for_model(&request.provider, &request.model_id)?;
        let provider = adapter.name().to_string();
        let model_id = request.model_id.clone();
        let capabilities = adapter.capabilities(&model_id);

        validate_request(&request)?;
        let messages = request
            .messages
            .iter()
            .map(|message| {
                for problem in validate(message) {
                    debug!(%provider, problem = %problem, "Message validation warning");
                }
                normalize(message)
            })
            .collect::<Vec<_>>();

        // Outside the breaker: configuration problems are not vendor failures
        let model = adapter.create_model(&model_id, &ModelOptions::default())?;

        let timeout = self.timeouts.resolve(
            &model_id,
            &capabilities,
            request.timeout_ms.map(Duration::from_millis),
        );
        let vendor_options = adapter.provider_options(&model_id, &request.options);
        let request_id = Uuid::new_v4();

        let permit = self.breakers.try_acquire(&provider)?;
        let started = Instant::now();
        let deadline = started + timeout.duration;

        info!(
            %provider,
            model = %model_id,
            %request_id,
            timeout_ms = timeout.duration.as_millis() as u64,
            tier = %timeout.tier,
            probe = permit.is_probe(),
            "stream_started"
        );

        let call = ModelCall {
            request_id,
            messages,
            system_prompt: request.system_prompt.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: request.tools.clone(),
            vendor_options,
        };

        let timeout_error = || ExecutionError::Timeout {
            provider: provider.clone(),
            timeout_ms: timeout.duration.as_millis() as u64,
        };

        let mut inner = match tokio::time::timeout_at(deadline, model.stream(call)).await {
            Ok(Ok(inner)) => inner,
            Ok(Err(err)) => {
                if err.counts_toward_breaker() {
                    permit.fail();
                }
                return Err(err);
            }
            Err(_) => {
                permit.fail();
                return Err(timeout_error());
            }
        };

        let stream_provider = provider.clone();
        let stream_model = model_id.clone();
        let timeout_failure = timeout_error();

        let events = async_stream::stream! {
            let provider = stream_provider;
            let mut blocks = BlockTracker::default();
            let mut text = String::new();
            let mut reasoning = String::new();
            let mut outcome: Option<(FinishReason, Option<Usage>)> = None;
            let mut failure: Option<ExecutionError> = None;

            yield StreamEvent::Start {
                message_id: Some(request_id.to_string()),
            };

            loop {
                let next = match tokio::time::timeout_at(deadline, inner.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        failure = Some(timeout_failure.clone());
                        break;
                    }
                };

                match next {
                    None => break,
                    Some(Err(err)) => {
                        failure = Some(ExecutionError::provider(provider.clone(), err));
                        break;
                    }
                    Some(Ok(ModelEvent::TextDelta(delta))) => {
                        for event in blocks.open_text() {
                            yield event;
                        }
                        text.push_str(&delta);
                        report("on_progress", hooks.on_progress(&delta).await);
                        yield StreamEvent::TextDelta { id: blocks.id(), delta };
                    }
                    Some(Ok(ModelEvent::ReasoningDelta(delta))) => {
                        for event in blocks.open_reasoning() {
                            yield event;
                        }
                        reasoning.push_str(&delta);
                        report("on_reasoning", hooks.on_reasoning(&delta).await);
                        yield StreamEvent::ReasoningDelta { id: blocks.id(), delta };
                    }
                    Some(Ok(ModelEvent::ThinkingDelta(delta))) => {
                        for event in blocks.open_reasoning() {
                            yield event;
                        }
                        reasoning.push_str(&delta);
                        report("on_thinking", hooks.on_thinking(&delta).await);
                        yield StreamEvent::ReasoningDelta { id: blocks.id(), delta };
                    }
                    Some(Ok(ModelEvent::ToolCall { id, name, input })) => {
                        if let Some(event) = blocks.close() {
                            yield event;
                        }
                        report("on_tool_call", hooks.on_tool_call(&id, &name, &input).await);
                        yield StreamEvent::ToolCall {
                            tool_call_id: id,
                            tool_name: name,
                            input,
                        };
                    }
                    Some(Ok(ModelEvent::ToolResult { id, output })) => {
                        if let Some(event) = blocks.close() {
                            yield event;
                        }
                        yield StreamEvent::ToolOutputAvailable {
                            tool_call_id: id,
                            output,
                        };
                    }
                    Some(Ok(ModelEvent::ToolError { id, error })) => {
                        if let Some(event) = blocks.close() {
                            yield event;
                        }
                        yield StreamEvent::ToolOutputError {
                            tool_call_id: id,
                            error_text: error,
                        };
                    }
                    Some(Ok(ModelEvent::Finish { reason, usage })) => {
                        outcome = Some((reason, usage));
                        break;
                    }
                }
            }

            if let Some(event) = blocks.close() {
                yield event;
            }
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match failure {
                None => {
                    permit.succeed();
                    let (finish_reason, usage) = outcome.unwrap_or((FinishReason::Stop, None));
                    info!(
                        %provider,
                        model = %stream_model,
                        %request_id,
                        elapsed_ms,
                        finish_reason = ?finish_reason,
                        input_tokens = usage.map(|u| u.input_tokens),
                        output_tokens = usage.map(|u| u.output_tokens),
                        "stream_finished"
                    );
                    let finished = FinishOutcome {
                        text,
                        reasoning,
                        usage,
                        finish_reason,
                    };
                    report("on_finish", hooks.on_finish(&finished).await);
                    yield StreamEvent::Finish {
                        finish_reason: Some(finish_reason),
                        usage,
                    };
                }
                Some(err) => {
                    if err.counts_toward_breaker() {
                        permit.fail();
                    } else {
                        drop(permit);
                    }
                    warn!(
                        %provider,
                        model = %stream_model,
                        %request_id,
                        elapsed_ms,
                        error = %err,
                        "stream_finished"
                    );
                    report("on_error", hooks.on_error(&err).await);
                    yield StreamEvent::Error {
                        error: err.to_string(),
                        code: err.code().to_string(),
                    };
                }
            }
        };

        Ok(StreamHandle {
            events: events.boxed(),
            capabilities,
            timeout,
            provider,
            model_id,
            request_id,
        })
    }
}

/// Request shape checks applied before any model is created
fn validate_request(request: &StreamRequest) -> ExecutionResult<()> {
    if request.model_id.trim().is_empty() {
        return Err(ExecutionError::Validation("modelId must not be empty".to_string()));
    }
    if request.messages.is_empty() {
        return Err(ExecutionError::Validation("messages must not be empty".to_string()));
    }
    if let Some(temperature) = request.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ExecutionError::Validation(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                temperature
            )));
        }
    }
    if request.max_tokens == Some(0) {
        return Err(ExecutionError::Validation("maxTokens must be positive".to_string()));
    }
    if request.timeout_ms == Some(0) {
        return Err(ExecutionError::Validation("timeout must be positive".to_string()));
    }

    let mut names = HashSet::new();
    for tool in &request.tools {
        if tool.name.trim().is_empty() {
            return Err(ExecutionError::Validation("tool name must not be empty".to_string()));
        }
        if !names.insert(tool.name.as_str()) {
            return Err(ExecutionError::Validation(format!(
                "duplicate tool name '{}'",
                tool.name
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Text,
    Reasoning,
}

/// Tracks the open text or reasoning block and numbers block ids
#[derive(Debug, Default)]
struct BlockTracker {
    open: Option<Block>,
    counter: usize,
}

impl BlockTracker {
    fn id(&self) -> String {
        self.counter.to_string()
    }

    fn close(&mut self) -> Option<StreamEvent> {
        let id = self.id();
        self.open.take().map(|block| match block {
            Block::Text => StreamEvent::TextEnd { id },
            Block::Reasoning => StreamEvent::ReasoningEnd { id },
        })
    }

    fn open(&mut self, block: Block) -> Vec<StreamEvent> {
        if self.open == Some(block) {
            return Vec::new();
        }
        let mut events: Vec<StreamEvent> = self.close().into_iter().collect();
        self.counter += 1;
        self.open = Some(block);
        let id = self.id();
        events.push(match block {
            Block::Text => StreamEvent::TextStart { id },
            Block::Reasoning => StreamEvent::ReasoningStart { id },
        });
        events
    }

    fn open_text(&mut self) -> Vec<StreamEvent> {
        self.open(Block::Text)
    }

    fn open_reasoning(&mut self) -> Vec<StreamEvent> {
        self.open(Block::Reasoning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::RawMessage;
    use crate::protocol::ToolDefinition;
    use serde_json::json;

    #[test]
    fn test_validate_request() {
        let ok = StreamRequest::new("openai", "gpt-4o", vec![RawMessage::user("hi")]);
        assert!(validate_request(&ok).is_ok());

        let empty = StreamRequest::new("openai", "gpt-4o", Vec::new());
        assert_eq!(validate_request(&empty).unwrap_err().code(), "validation_error");

        let hot = ok.clone().with_temperature(3.5);
        assert!(validate_request(&hot).is_err());

        let duplicate = ok
            .clone()
            .with_tool(ToolDefinition::new("search", json!({})))
            .with_tool(ToolDefinition::new("search", json!({})));
        assert!(validate_request(&duplicate).is_err());
    }

    #[test]
    fn test_block_tracker_switches_blocks() {
        let mut blocks = BlockTracker::default();
        assert_eq!(
            blocks.open_reasoning(),
            vec![StreamEvent::ReasoningStart { id: "1".to_string() }]
        );
        assert!(blocks.open_reasoning().is_empty());
        assert_eq!(
            blocks.open_text(),
            vec![
                StreamEvent::ReasoningEnd { id: "1".to_string() },
                StreamEvent::TextStart { id: "2".to_string() },
            ]
        );
        assert_eq!(blocks.close(), Some(StreamEvent::TextEnd { id: "2".to_string() }));
        assert_eq!(blocks.close(), None);
    }
}
