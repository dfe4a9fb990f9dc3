//! OpenAI provider implementation
//!
//! Streams chat completions from `/chat/completions` with usage reporting
//! enabled. Reasoning families (o-series, gpt-5) take `reasoning_effort`
//! and `max_completion_tokens`, and reject `temperature`.

use super::adapter::{
    check_model_id, effort_for_budget, resolve_endpoint, ImageModel, ModelCall, ModelEvent,
    ModelHandle, ModelOptions, ProviderAdapter, VendorOptions,
};
use super::error::{ProviderError, ProviderResult};
use super::http_model::{parse_data, truncated_stream, HttpLanguageModel, StreamDecoder, WireDialect};
use super::patterns::{match_family, ModelFamily};
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
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const SEARCH_TOOLS: &[&str] = &["web_search", "file_search", "code_interpreter"];

/// Known OpenAI model families
pub const MODEL_FAMILIES: &[ModelFamily] = &[
    ModelFamily {
        pattern: "gpt-5*",
        supports_reasoning: true,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: SEARCH_TOOLS,
        typical_latency_ms: 8_000,
        max_timeout_ms: 300_000,
        cost_per_input_token: 0.000_001_25,
        cost_per_output_token: 0.000_01,
        supports_images: false,
    },
    ModelFamily {
        pattern: "o1*",
        supports_reasoning: true,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: &[],
        typical_latency_ms: 15_000,
        max_timeout_ms: 300_000,
        cost_per_input_token: 0.000_015,
        cost_per_output_token: 0.000_06,
        supports_images: false,
    },
    ModelFamily {
        pattern: "o3*",
        supports_reasoning: true,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: SEARCH_TOOLS,
        typical_latency_ms: 10_000,
        max_timeout_ms: 300_000,
        cost_per_input_token: 0.000_002,
        cost_per_output_token: 0.000_008,
        supports_images: false,
    },
    ModelFamily {
        pattern: "o4-mini*",
        supports_reasoning: true,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: SEARCH_TOOLS,
        typical_latency_ms: 5_000,
        max_timeout_ms: 300_000,
        cost_per_input_token: 0.000_001_1,
        cost_per_output_token: 0.000_004_4,
        supports_images: false,
    },
    ModelFamily {
        pattern: "gpt-4.1*",
        supports_reasoning: false,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: &["web_search", "file_search"],
        typical_latency_ms: 2_000,
        max_timeout_ms: 60_000,
        cost_per_input_token: 0.000_002,
        cost_per_output_token: 0.000_008,
        supports_images: false,
    },
    ModelFamily {
        pattern: "gpt-4o*",
        supports_reasoning: false,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: &["web_search", "file_search"],
        typical_latency_ms: 1_500,
        max_timeout_ms: 60_000,
        cost_per_input_token: 0.000_002_5,
        cost_per_output_token: 0.000_01,
        supports_images: false,
    },
    ModelFamily {
        pattern: "gpt-4*",
        supports_reasoning: false,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: &[],
        typical_latency_ms: 3_000,
        max_timeout_ms: 60_000,
        cost_per_input_token: 0.000_03,
        cost_per_output_token: 0.000_06,
        supports_images: false,
    },
    ModelFamily {
        pattern: "gpt-3.5*",
        supports_reasoning: false,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: &[],
        typical_latency_ms: 1_000,
        max_timeout_ms: 60_000,
        cost_per_input_token: 0.000_000_5,
        cost_per_output_token: 0.000_001_5,
        supports_images: false,
    },
    ModelFamily {
        pattern: "dall-e*",
        supports_reasoning: false,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: &[],
        typical_latency_ms: 10_000,
        max_timeout_ms: 120_000,
        cost_per_input_token: 0.0,
        cost_per_output_token: 0.0,
        supports_images: true,
    },
    ModelFamily {
        pattern: "gpt-image*",
        supports_reasoning: false,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: &[],
        typical_latency_ms: 15_000,
        max_timeout_ms: 120_000,
        cost_per_input_token: 0.000_005,
        cost_per_output_token: 0.000_04,
        supports_images: true,
    },
];

/// OpenAI provider implementation
pub struct OpenAIAdapter {
    settings: Arc<dyn SettingsResolver>,
    http: HttpClient,
}

impl OpenAIAdapter {
    /// Create a new OpenAI adapter
    pub fn new(settings: Arc<dyn SettingsResolver>, http: HttpClient) -> Self {
        Self { settings, http }
    }
}

impl ProviderAdapter for OpenAIAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    fn families(&self) -> &'static [ModelFamily] {
        MODEL_FAMILIES
    }

    fn create_model(&self, model_id: &str, options: &ModelOptions) -> ExecutionResult<ModelHandle> {
        check_model_id(self.name(), model_id)?;
        let endpoint = resolve_endpoint(self.settings.as_ref(), self.name(), options, DEFAULT_BASE_URL)?;

        let dialect = OpenAIDialect {
            base_url: endpoint.base_url,
            api_key: endpoint.api_key,
            extra_headers: options.extra_headers.clone(),
            reasoning: self.capabilities(model_id).supports_reasoning,
        };
        Ok(Arc::new(HttpLanguageModel::new(
            self.name(),
            model_id,
            self.http.clone(),
            Arc::new(dialect),
        )))
    }

    fn create_image_model(
        &self,
        model_id: &str,
        options: &ModelOptions,
    ) -> ExecutionResult<ImageModel> {
        check_model_id(self.name(), model_id)?;
        if !match_family(MODEL_FAMILIES, model_id).is_some_and(|f| f.supports_images) {
            return Err(ExecutionError::UnsupportedOperation(format!(
                "'{}' is not an OpenAI image model",
                model_id
            )));
        }
        let endpoint = resolve_endpoint(self.settings.as_ref(), self.name(), options, DEFAULT_BASE_URL)?;

        Ok(ImageModel {
            provider: self.name().to_string(),
            model_id: model_id.to_string(),
            endpoint: format!("{}/images/generations", endpoint.base_url),
        })
    }

    fn provider_options(&self, model_id: &str, options: &ReasoningOptions) -> VendorOptions {
        if !self.capabilities(model_id).supports_reasoning {
            return VendorOptions::None;
        }
        let reasoning_effort = options
            .reasoning_effort
            .or_else(|| options.thinking_budget.map(effort_for_budget));
        VendorOptions::OpenAI { reasoning_effort }
    }
}

/// Chat completions wire format
struct OpenAIDialect {
    base_url: String,
    api_key: SecretString,
    extra_headers: HashMap<String, String>,
    reasoning: bool,
}

impl WireDialect for OpenAIDialect {
    fn build_request(&self, model_id: &str, call: &ModelCall) -> ExecutionResult<VendorRequest> {
        let mut body = json!({
            "model": model_id,
            "messages": openai_messages(call)?,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        if let Some(max_tokens) = call.max_tokens {
            let field = if self.reasoning {
                "max_completion_tokens"
            } else {
                "max_tokens"
            };
            body[field] = json!(max_tokens);
        }
        if let (Some(temperature), false) = (call.temperature, self.reasoning) {
            body["temperature"] = json!(temperature);
        }
        if !call.tools.is_empty() {
            body["tools"] = call
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
        }
        call.vendor_options.apply(&mut body);

        let mut request = VendorRequest::new(format!("{}/chat/completions", self.base_url), body)
            .with_header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            );
        for (key, value) in &self.extra_headers {
            request = request.with_header(key.clone(), value.clone());
        }
        Ok(request)
    }

    fn decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(ChatChunkDecoder::default())
    }
}

/// Convert canonical messages to OpenAI chat messages
fn openai_messages(call: &ModelCall) -> ExecutionResult<Vec<Value>> {
    let mut messages = Vec::with_capacity(call.messages.len() + 1);
    if let Some(system) = &call.system_prompt {
        messages.push(json!({"role": "system", "content": system}));
    }

    for message in &call.messages {
        let mut content = Vec::new();
        let mut tool_calls = Vec::new();

        for part in message.parts() {
            match part {
                ContentPart::Text { text } => content.push(json!({"type": "text", "text": text})),
                ContentPart::Image {
                    url,
                    base64,
                    media_type,
                } => {
                    let url = match (url, base64) {
                        (Some(url), _) => url.clone(),
                        (None, Some(data)) => format!(
                            "data:{};base64,{}",
                            media_type.as_deref().unwrap_or("image/png"),
                            data
                        ),
                        (None, None) => {
                            return Err(ExecutionError::Conversion(
                                "image part has neither url nor base64 data".to_string(),
                            ))
                        }
                    };
                    content.push(json!({"type": "image_url", "image_url": {"url": url}}));
                }
                ContentPart::ToolCall {
                    tool_call_id,
                    tool_name,
                    input,
                } => tool_calls.push(json!({
                    "id": tool_call_id,
                    "type": "function",
                    "function": {"name": tool_name, "arguments": input.to_string()},
                })),
                ContentPart::ToolResult {
                    tool_call_id,
                    output,
                    ..
                } => messages.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": value_as_text(output),
                })),
                ContentPart::Reasoning { .. } => {}
            }
        }

        if content.is_empty() && tool_calls.is_empty() {
            continue;
        }

        let only_text = content.iter().all(|c| c["type"] == "text");
        let content = if content.is_empty() {
            Value::Null
        } else if only_text {
            Value::String(
                content
                    .iter()
                    .filter_map(|c| c["text"].as_str())
                    .collect::<String>(),
            )
        } else {
            Value::Array(content)
        };

        let mut entry = json!({"role": message.role().as_str(), "content": content});
        if !tool_calls.is_empty() && message.role() == MessageRole::Assistant {
            entry["tool_calls"] = Value::Array(tool_calls);
        }
        messages.push(entry);
    }

    Ok(messages)
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Decoder for chat completion chunks
///
/// Tool call arguments arrive in fragments keyed by index and are emitted
/// whole when the stream ends.
#[derive(Debug, Default)]
struct ChatChunkDecoder {
    tool_calls: BTreeMap<usize, PendingToolCall>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    done: bool,
}

impl StreamDecoder for ChatChunkDecoder {
    fn decode(&mut self, event: &Event) -> ProviderResult<Vec<ModelEvent>> {
        if event.data.trim() == "[DONE]" {
            self.done = true;
            return Ok(Vec::new());
        }

        let chunk: ChatChunk = parse_data(event)?;
        if let Some(error) = chunk.error {
            return Err(ProviderError::Stream {
                message: match error.kind {
                    Some(kind) => format!("{}: {}", kind, error.message),
                    None => error.message,
                },
            });
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(Usage::new(usage.prompt_tokens, usage.completion_tokens));
        }

        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(reasoning) = choice.delta.reasoning_content.filter(|r| !r.is_empty()) {
                events.push(ModelEvent::ReasoningDelta(reasoning));
            }
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                events.push(ModelEvent::TextDelta(text));
            }
            for delta in choice.delta.tool_calls {
                let pending = self.tool_calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    pending.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        pending.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        pending.arguments.push_str(&arguments);
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(FinishReason::from_vendor(&reason));
            }
        }
        Ok(events)
    }

    fn finish(&mut self) -> ProviderResult<Vec<ModelEvent>> {
        if !self.done && self.finish_reason.is_none() {
            return Err(truncated_stream());
        }

        let mut events: Vec<ModelEvent> = std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|call| ModelEvent::ToolCall {
                input: parse_arguments(&call.arguments),
                id: call.id,
                name: call.name,
            })
            .collect();
        events.push(ModelEvent::Finish {
            reason: self.finish_reason.unwrap_or(FinishReason::Stop),
            usage: self.usage,
        });
        Ok(events)
    }
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
