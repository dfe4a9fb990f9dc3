//! Anthropic provider implementation
//!
//! Streams from the Messages API. System messages are lifted into the
//! top-level `system` field, `max_tokens` is mandatory, and extended
//! thinking is enabled through a clamped `budget_tokens`.

use super::adapter::{
    check_model_id, resolve_endpoint, thinking_budget_for, ModelCall, ModelEvent, ModelHandle,
    ModelOptions, ProviderAdapter, VendorOptions,
};
use super::error::{ProviderError, ProviderResult};
use super::http_model::{parse_data, truncated_stream, HttpLanguageModel, StreamDecoder, WireDialect};
use super::patterns::ModelFamily;
use crate::config::{SecretString, SettingsResolver};
use crate::error::{ExecutionError, ExecutionResult};
use crate::http::{HttpClient, VendorRequest};
use crate::protocol::types::{ContentPart, FinishReason, MessageRole, ReasoningOptions, Usage};
use eventsource_stream::Event;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Default API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// API version header value
const API_VERSION: &str = "2023-06-01";

/// Used when the caller sets no limit
const DEFAULT_MAX_TOKENS: u32 = 4_096;

/// Smallest thinking budget the API accepts
const MIN_THINKING_BUDGET: u32 = 1_024;

const CLAUDE_TOOLS: &[&str] = &["web_search", "code_execution"];

/// Known Claude model families
///
/// Leading wildcards let Bedrock and Vertex ids such as
/// `anthropic.claude-opus-4-v1:0` resolve to the same family.
pub const MODEL_FAMILIES: &[ModelFamily] = &[
    ModelFamily {
        pattern: "*claude-opus-4*",
        supports_reasoning: true,
        supports_thinking: true,
        max_thinking_tokens: 32_000,
        tools: CLAUDE_TOOLS,
        typical_latency_ms: 6_000,
        max_timeout_ms: 300_000,
        cost_per_input_token: 0.000_015,
        cost_per_output_token: 0.000_075,
        supports_images: false,
    },
    ModelFamily {
        pattern: "*claude-sonnet-4*",
        supports_reasoning: true,
        supports_thinking: true,
        max_thinking_tokens: 64_000,
        tools: CLAUDE_TOOLS,
        typical_latency_ms: 3_000,
        max_timeout_ms: 300_000,
        cost_per_input_token: 0.000_003,
        cost_per_output_token: 0.000_015,
        supports_images: false,
    },
    ModelFamily {
        pattern: "claude-4*",
        supports_reasoning: true,
        supports_thinking: true,
        max_thinking_tokens: 32_000,
        tools: CLAUDE_TOOLS,
        typical_latency_ms: 4_000,
        max_timeout_ms: 300_000,
        cost_per_input_token: 0.000_003,
        cost_per_output_token: 0.000_015,
        supports_images: false,
    },
    ModelFamily {
        pattern: "*claude-3-7-sonnet*",
        supports_reasoning: true,
        supports_thinking: true,
        max_thinking_tokens: 64_000,
        tools: &["web_search"],
        typical_latency_ms: 3_000,
        max_timeout_ms: 300_000,
        cost_per_input_token: 0.000_003,
        cost_per_output_token: 0.000_015,
        supports_images: false,
    },
    ModelFamily {
        pattern: "*claude-3-5*",
        supports_reasoning: false,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: &[],
        typical_latency_ms: 2_000,
        max_timeout_ms: 60_000,
        cost_per_input_token: 0.000_003,
        cost_per_output_token: 0.000_015,
        supports_images: false,
    },
    ModelFamily {
        pattern: "*claude-3*",
        supports_reasoning: false,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: &[],
        typical_latency_ms: 2_000,
        max_timeout_ms: 60_000,
        cost_per_input_token: 0.000_003,
        cost_per_output_token: 0.000_015,
        supports_images: false,
    },
    ModelFamily {
        pattern: "claude-*",
        supports_reasoning: false,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: &[],
        typical_latency_ms: 2_000,
        max_timeout_ms: 60_000,
        cost_per_input_token: 0.000_008,
        cost_per_output_token: 0.000_024,
        supports_images: false,
    },
];

/// Anthropic provider implementation
pub struct AnthropicAdapter {
    settings: Arc<dyn SettingsResolver>,
    http: HttpClient,
}

impl AnthropicAdapter {
    /// Create a new Anthropic adapter
    pub fn new(settings: Arc<dyn SettingsResolver>, http: HttpClient) -> Self {
        Self { settings, http }
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn families(&self) -> &'static [ModelFamily] {
        MODEL_FAMILIES
    }

    fn create_model(&self, model_id: &str, options: &ModelOptions) -> ExecutionResult<ModelHandle> {
        check_model_id(self.name(), model_id)?;
        let endpoint = resolve_endpoint(self.settings.as_ref(), self.name(), options, DEFAULT_BASE_URL)?;

        let dialect = MessagesDialect {
            base_url: endpoint.base_url,
            api_key: endpoint.api_key,
            extra_headers: options.extra_headers.clone(),
        };
        Ok(Arc::new(HttpLanguageModel::new(
            self.name(),
            model_id,
            self.http.clone(),
            Arc::new(dialect),
        )))
    }

    fn provider_options(&self, model_id: &str, options: &ReasoningOptions) -> VendorOptions {
        let capabilities = self.capabilities(model_id);
        match thinking_budget_for(&capabilities, options, MIN_THINKING_BUDGET) {
            Some(budget) => VendorOptions::Anthropic {
                thinking_budget_tokens: Some(budget),
            },
            None => VendorOptions::None,
        }
    }
}

/// Messages API wire format
struct MessagesDialect {
    base_url: String,
    api_key: SecretString,
    extra_headers: HashMap<String, String>,
}

impl WireDialect for MessagesDialect {
    fn build_request(&self, model_id: &str, call: &ModelCall) -> ExecutionResult<VendorRequest> {
        let (system, messages) = anthropic_messages(call)?;

        let thinking_budget = match call.vendor_options {
            VendorOptions::Anthropic {
                thinking_budget_tokens,
            } => thinking_budget_tokens,
            _ => None,
        };
        // max_tokens must exceed the thinking budget
        let mut max_tokens = call.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        if let Some(budget) = thinking_budget {
            max_tokens = max_tokens.max(budget + DEFAULT_MAX_TOKENS);
        }

        let mut body = json!({
            "model": model_id,
            "messages": messages,
            "max_tokens": max_tokens,
            "stream": true,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        // Thinking requires the default temperature
        if let (Some(temperature), None) = (call.temperature, thinking_budget) {
            body["temperature"] = json!(temperature);
        }
        if !call.tools.is_empty() {
            body["tools"] = call
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.parameters,
                    })
                })
                .collect();
        }
        call.vendor_options.apply(&mut body);

        let mut request = VendorRequest::new(format!("{}/messages", self.base_url), body)
            .with_header("x-api-key", self.api_key.expose_secret())
            .with_header("anthropic-version", API_VERSION);
        for (key, value) in &self.extra_headers {
            request = request.with_header(key.clone(), value.clone());
        }
        Ok(request)
    }

    fn decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(MessagesDecoder::default())
    }
}

/// Split canonical messages into the `system` text and content-block messages
fn anthropic_messages(call: &ModelCall) -> ExecutionResult<(String, Vec<Value>)> {
    let mut system: Vec<String> = call.system_prompt.iter().cloned().collect();
    let mut messages = Vec::with_capacity(call.messages.len());

    for message in &call.messages {
        if message.role() == MessageRole::System {
            system.extend(
                message
                    .parts()
                    .iter()
                    .filter_map(ContentPart::as_text)
                    .map(str::to_string),
            );
            continue;
        }

        let mut blocks = Vec::new();
        for part in message.parts() {
            match part {
                ContentPart::Text { text } => {
                    if !text.is_empty() {
                        blocks.push(json!({"type": "text", "text": text}));
                    }
                }
                ContentPart::Image {
                    url,
                    base64,
                    media_type,
                } => {
                    let source = match (base64, url) {
                        (Some(data), _) => json!({
                            "type": "base64",
                            "media_type": media_type.as_deref().unwrap_or("image/png"),
                            "data": data,
                        }),
                        (None, Some(url)) => json!({"type": "url", "url": url}),
                        (None, None) => {
                            return Err(ExecutionError::Conversion(
                                "image part has neither url nor base64 data".to_string(),
                            ))
                        }
                    };
                    blocks.push(json!({"type": "image", "source": source}));
                }
                ContentPart::ToolCall {
                    tool_call_id,
                    tool_name,
                    input,
                } => blocks.push(json!({
                    "type": "tool_use",
                    "id": tool_call_id,
                    "name": tool_name,
                    "input": input,
                })),
                ContentPart::ToolResult {
                    tool_call_id,
                    output,
                    ..
                } => blocks.push(json!({
                    "type": "tool_result",
                    "tool_use_id": tool_call_id,
                    "content": match output {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    },
                })),
                ContentPart::Reasoning { .. } => {}
            }
        }

        if blocks.is_empty() {
            continue;
        }
        messages.push(json!({"role": message.role().as_str(), "content": blocks}));
    }

    Ok((system.join("\n\n"), messages))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessagesEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<OutputUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorBody,
    },
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    #[serde(default)]
    usage: Option<InputUsage>,
}

#[derive(Debug, Deserialize)]
struct InputUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OutputUsage {
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text,
    Thinking,
    RedactedThinking,
    ToolUse { id: String, name: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[derive(Debug)]
struct PendingToolUse {
    id: String,
    name: String,
    input_json: String,
}

/// Decoder for Messages API events
#[derive(Debug, Default)]
struct MessagesDecoder {
    tool_uses: BTreeMap<usize, PendingToolUse>,
    input_tokens: u32,
    output_tokens: u32,
    stop_reason: Option<FinishReason>,
    stopped: bool,
}

impl StreamDecoder for MessagesDecoder {
    fn decode(&mut self, event: &Event) -> ProviderResult<Vec<ModelEvent>> {
        let mut events = Vec::new();
        match parse_data::<MessagesEvent>(event)? {
            MessagesEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.input_tokens = usage.input_tokens;
                    self.output_tokens = usage.output_tokens;
                }
            }
            MessagesEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::ToolUse { id, name },
            } => {
                self.tool_uses.insert(
                    index,
                    PendingToolUse {
                        id,
                        name,
                        input_json: String::new(),
                    },
                );
            }
            MessagesEvent::ContentBlockStart { .. } => {}
            MessagesEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } if !text.is_empty() => {
                    events.push(ModelEvent::TextDelta(text))
                }
                BlockDelta::ThinkingDelta { thinking } if !thinking.is_empty() => {
                    events.push(ModelEvent::ThinkingDelta(thinking))
                }
                BlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(pending) = self.tool_uses.get_mut(&index) {
                        pending.input_json.push_str(&partial_json);
                    }
                }
                _ => {}
            },
            MessagesEvent::ContentBlockStop { index } => {
                if let Some(pending) = self.tool_uses.remove(&index) {
                    let input = if pending.input_json.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&pending.input_json)?
                    };
                    events.push(ModelEvent::ToolCall {
                        id: pending.id,
                        name: pending.name,
                        input,
                    });
                }
            }
            MessagesEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.stop_reason = Some(FinishReason::from_vendor(&reason));
                }
                if let Some(usage) = usage {
                    self.output_tokens = usage.output_tokens;
                }
            }
            MessagesEvent::MessageStop => self.stopped = true,
            MessagesEvent::Ping => {}
            MessagesEvent::Error { error } => return Err(stream_error(error)),
        }
        Ok(events)
    }

    fn finish(&mut self) -> ProviderResult<Vec<ModelEvent>> {
        if !self.stopped {
            return Err(truncated_stream());
        }
        Ok(vec![ModelEvent::Finish {
            reason: self.stop_reason.unwrap_or(FinishReason::Stop),
            usage: Some(Usage::new(self.input_tokens, self.output_tokens)),
        }])
    }
}

fn stream_error(error: ErrorBody) -> ProviderError {
    match error.kind.as_str() {
        "overloaded_error" => ProviderError::ServerError {
            status_code: 529,
            message: error.message,
        },
        "rate_limit_error" => ProviderError::RateLimit { retry_after: None },
        "api_error" => ProviderError::ServerError {
            status_code: 500,
            message: error.message,
        },
        _ => ProviderError::Stream {
            message: format!("{}: {}", error.kind, error.message),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderSettings, StaticSettings};
    use crate::protocol::types::{CanonicalMessage, ReasoningEffort};
    use uuid::Uuid;

    fn adapter() -> AnthropicAdapter {
        AnthropicAdapter::new(
            Arc::new(
                StaticSettings::new()
                    .insert(ProviderSettings::new("anthropic").with_api_key("sk-ant-test")),
            ),
            HttpClient::new().unwrap(),
        )
    }

    fn event(data: &str) -> Event {
        Event {
            data: data.to_string(),
            ..Event::default()
        }
    }

    #[test]
    fn test_capabilities_for_platform_ids() {
        let anthropic = adapter();
        let bedrock = anthropic.capabilities("anthropic.claude-opus-4-20250514-v1:0");
        assert!(bedrock.supports_thinking);
        assert_eq!(bedrock.max_thinking_tokens, 32_000);

        let legacy = anthropic.capabilities("claude-instant-1.2");
        assert!(!legacy.supports_reasoning);
        assert!(anthropic.supports_model("claude-3-haiku-20240307"));
        assert!(!anthropic.supports_model("gpt-4o"));
    }

    #[test]
    fn test_image_models_unsupported() {
        let err = adapter()
            .create_image_model("claude-opus-4", &ModelOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "unsupported_operation");
    }

    #[test]
    fn test_thinking_budget_is_clamped() {
        let anthropic = adapter();
        let options = ReasoningOptions {
            reasoning_effort: None,
            thinking_budget: Some(100_000),
        };
        assert_eq!(
            anthropic.provider_options("claude-opus-4-1", &options),
            VendorOptions::Anthropic {
                thinking_budget_tokens: Some(32_000)
            }
        );

        let effort = ReasoningOptions {
            reasoning_effort: Some(ReasoningEffort::High),
            thinking_budget: None,
        };
        assert_eq!(
            anthropic.provider_options("claude-3-5-sonnet", &effort),
            VendorOptions::None
        );
    }

    #[test]
    fn test_system_messages_lifted() {
        let dialect = MessagesDialect {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: SecretString::new("sk-ant-test"),
            extra_headers: HashMap::new(),
        };
        let call = ModelCall {
            request_id: Uuid::new_v4(),
            messages: vec![
                CanonicalMessage::text(MessageRole::System, "Answer in French."),
                CanonicalMessage::text(MessageRole::User, "Hello"),
            ],
            system_prompt: Some("You are terse.".to_string()),
            max_tokens: None,
            temperature: Some(0.5),
            tools: Vec::new(),
            vendor_options: VendorOptions::Anthropic {
                thinking_budget_tokens: Some(2_048),
            },
        };
        let request = dialect.build_request("claude-opus-4", &call).unwrap();

        assert_eq!(request.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(request.headers["anthropic-version"], API_VERSION);
        assert_eq!(request.body["system"], "You are terse.\n\nAnswer in French.");
        assert_eq!(request.body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(request.body["max_tokens"], 2_048 + DEFAULT_MAX_TOKENS);
        assert_eq!(request.body["thinking"]["budget_tokens"], 2_048);
        assert!(request.body.get("temperature").is_none());
    }

    #[test]
    fn test_decoder_event_sequence() {
        let mut decoder = MessagesDecoder::default();
        let frames = [
            r#"{"type":"message_start","message":{"usage":{"input_tokens":20,"output_tokens":1}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"Let me see"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"Bonjour"}}"#,
            r#"{"type":"content_block_stop","index":1}"#,
            r#"{"type":"content_block_start","index":2,"content_block":{"type":"tool_use","id":"toolu_1","name":"translate","input":{}}}"#,
            r#"{"type":"content_block_delta","index":2,"delta":{"type":"input_json_delta","partial_json":"{\"to\":\"fr\"}"}}"#,
            r#"{"type":"content_block_stop","index":2}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":42}}"#,
            r#"{"type":"message_stop"}"#,
        ];

        let mut events = Vec::new();
        for frame in frames {
            events.extend(decoder.decode(&event(frame)).unwrap());
        }
        events.extend(decoder.finish().unwrap());

        assert_eq!(
            events,
            vec![
                ModelEvent::ThinkingDelta("Let me see".to_string()),
                ModelEvent::TextDelta("Bonjour".to_string()),
                ModelEvent::ToolCall {
                    id: "toolu_1".to_string(),
                    name: "translate".to_string(),
                    input: json!({"to": "fr"}),
                },
                ModelEvent::Finish {
                    reason: FinishReason::ToolCalls,
                    usage: Some(Usage::new(20, 42)),
                },
            ]
        );
    }

    #[test]
    fn test_overloaded_error_event() {
        let mut decoder = MessagesDecoder::default();
        let err = decoder
            .decode(&event(
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
            ))
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
