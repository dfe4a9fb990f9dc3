//! Google Gemini provider implementation
//!
//! Streams from `models/{id}:streamGenerateContent?alt=sse`. Thought
//! summaries arrive as text parts flagged `thought: true` and are surfaced
//! as thinking deltas.

use super::adapter::{
    check_model_id, resolve_endpoint, thinking_budget_for, ImageModel, ModelCall, ModelEvent,
    ModelHandle, ModelOptions, ProviderAdapter, VendorOptions,
};
use super::error::ProviderResult;
use super::http_model::{parse_data, truncated_stream, HttpLanguageModel, StreamDecoder, WireDialect};
use super::patterns::{match_family, ModelFamily};
use crate::config::{SecretString, SettingsResolver};
use crate::error::{ExecutionError, ExecutionResult};
use crate::http::{HttpClient, VendorRequest};
use crate::protocol::types::{ContentPart, FinishReason, MessageRole, ReasoningOptions, Usage};
use eventsource_stream::Event;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Default API endpoint
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const GEMINI_TOOLS: &[&str] = &["google_search", "code_execution", "url_context"];

/// Known Gemini and Imagen model families
pub const MODEL_FAMILIES: &[ModelFamily] = &[
    ModelFamily {
        pattern: "gemini-2.5-pro*",
        supports_reasoning: true,
        supports_thinking: true,
        max_thinking_tokens: 32_768,
        tools: GEMINI_TOOLS,
        typical_latency_ms: 6_000,
        max_timeout_ms: 300_000,
        cost_per_input_token: 0.000_001_25,
        cost_per_output_token: 0.000_01,
        supports_images: false,
    },
    ModelFamily {
        pattern: "gemini-2.5-flash*",
        supports_reasoning: true,
        supports_thinking: true,
        max_thinking_tokens: 24_576,
        tools: GEMINI_TOOLS,
        typical_latency_ms: 2_500,
        max_timeout_ms: 300_000,
        cost_per_input_token: 0.000_000_3,
        cost_per_output_token: 0.000_002_5,
        supports_images: false,
    },
    ModelFamily {
        pattern: "gemini-2.0*",
        supports_reasoning: false,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: &["google_search", "code_execution"],
        typical_latency_ms: 1_500,
        max_timeout_ms: 60_000,
        cost_per_input_token: 0.000_000_1,
        cost_per_output_token: 0.000_000_4,
        supports_images: false,
    },
    ModelFamily {
        pattern: "gemini-1.5*",
        supports_reasoning: false,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: &[],
        typical_latency_ms: 2_000,
        max_timeout_ms: 60_000,
        cost_per_input_token: 0.000_001_25,
        cost_per_output_token: 0.000_005,
        supports_images: false,
    },
    ModelFamily {
        pattern: "gemini-*",
        supports_reasoning: false,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: &[],
        typical_latency_ms: 2_000,
        max_timeout_ms: 60_000,
        cost_per_input_token: 0.0,
        cost_per_output_token: 0.0,
        supports_images: false,
    },
    ModelFamily {
        pattern: "imagen*",
        supports_reasoning: false,
        supports_thinking: false,
        max_thinking_tokens: 0,
        tools: &[],
        typical_latency_ms: 8_000,
        max_timeout_ms: 120_000,
        cost_per_input_token: 0.0,
        cost_per_output_token: 0.0,
        supports_images: true,
    },
];

/// Google provider implementation
pub struct GoogleAdapter {
    settings: Arc<dyn SettingsResolver>,
    http: HttpClient,
}

impl GoogleAdapter {
    /// Create a new Google adapter
    pub fn new(settings: Arc<dyn SettingsResolver>, http: HttpClient) -> Self {
        Self { settings, http }
    }
}

impl ProviderAdapter for GoogleAdapter {
    fn name(&self) -> &str {
        "google"
    }

    fn families(&self) -> &'static [ModelFamily] {
        MODEL_FAMILIES
    }

    fn create_model(&self, model_id: &str, options: &ModelOptions) -> ExecutionResult<ModelHandle> {
        check_model_id(self.name(), model_id)?;
        let endpoint = resolve_endpoint(self.settings.as_ref(), self.name(), options, DEFAULT_BASE_URL)?;

        let dialect = GenerateContentDialect {
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

    fn create_image_model(
        &self,
        model_id: &str,
        options: &ModelOptions,
    ) -> ExecutionResult<ImageModel> {
        check_model_id(self.name(), model_id)?;
        if !match_family(MODEL_FAMILIES, model_id).is_some_and(|f| f.supports_images) {
            return Err(ExecutionError::UnsupportedOperation(format!(
                "'{}' is not a Google image model",
                model_id
            )));
        }
        let endpoint = resolve_endpoint(self.settings.as_ref(), self.name(), options, DEFAULT_BASE_URL)?;

        Ok(ImageModel {
            provider: self.name().to_string(),
            model_id: model_id.to_string(),
            endpoint: format!("{}/models/{}:predict", endpoint.base_url, model_id),
        })
    }

    fn provider_options(&self, model_id: &str, options: &ReasoningOptions) -> VendorOptions {
        let capabilities = self.capabilities(model_id);
        if !capabilities.supports_thinking {
            return VendorOptions::None;
        }
        VendorOptions::Google {
            thinking_budget: thinking_budget_for(&capabilities, options, 0),
            include_thoughts: true,
        }
    }
}

/// generateContent wire format
struct GenerateContentDialect {
    base_url: String,
    api_key: SecretString,
    extra_headers: HashMap<String, String>,
}

impl WireDialect for GenerateContentDialect {
    fn build_request(&self, model_id: &str, call: &ModelCall) -> ExecutionResult<VendorRequest> {
        let (system, contents) = gemini_contents(call)?;

        let mut body = json!({ "contents": contents });
        if !system.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if let Some(max_tokens) = call.max_tokens {
            body["generationConfig"]["maxOutputTokens"] = json!(max_tokens);
        }
        if let Some(temperature) = call.temperature {
            body["generationConfig"]["temperature"] = json!(temperature);
        }
        if !call.tools.is_empty() {
            let declarations: Vec<Value> = call
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        call.vendor_options.apply(&mut body);

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model_id
        );
        let mut request =
            VendorRequest::new(url, body).with_header("x-goog-api-key", self.api_key.expose_secret());
        for (key, value) in &self.extra_headers {
            request = request.with_header(key.clone(), value.clone());
        }
        Ok(request)
    }

    fn decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(GenerateContentDecoder::default())
    }
}

/// Split canonical messages into system instruction text and `contents`
fn gemini_contents(call: &ModelCall) -> ExecutionResult<(String, Vec<Value>)> {
    let mut system: Vec<String> = call.system_prompt.iter().cloned().collect();
    let mut contents = Vec::with_capacity(call.messages.len());

    for message in &call.messages {
        let role = match message.role() {
            MessageRole::System => {
                system.extend(
                    message
                        .parts()
                        .iter()
                        .filter_map(ContentPart::as_text)
                        .map(str::to_string),
                );
                continue;
            }
            MessageRole::User => "user",
            MessageRole::Assistant => "model",
        };

        let mut parts = Vec::new();
        for part in message.parts() {
            match part {
                ContentPart::Text { text } => {
                    if !text.is_empty() {
                        parts.push(json!({"text": text}));
                    }
                }
                ContentPart::Image {
                    url,
                    base64,
                    media_type,
                } => {
                    let mime = media_type.as_deref().unwrap_or("image/png");
                    match (base64, url) {
                        (Some(data), _) => {
                            parts.push(json!({"inlineData": {"mimeType": mime, "data": data}}))
                        }
                        (None, Some(url)) => {
                            parts.push(json!({"fileData": {"mimeType": mime, "fileUri": url}}))
                        }
                        (None, None) => {
                            return Err(ExecutionError::Conversion(
                                "image part has neither url nor base64 data".to_string(),
                            ))
                        }
                    }
                }
                ContentPart::ToolCall {
                    tool_name, input, ..
                } => parts.push(json!({"functionCall": {"name": tool_name, "args": input}})),
                ContentPart::ToolResult {
                    tool_name, output, ..
                } => parts.push(json!({
                    "functionResponse": {"name": tool_name, "response": {"result": output}}
                })),
                ContentPart::Reasoning { .. } => {}
            }
        }

        if !parts.is_empty() {
            contents.push(json!({"role": role, "parts": parts}));
        }
    }

    Ok((system.join("\n\n"), contents))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    thoughts_token_count: u32,
}

/// Decoder for generateContent chunks
#[derive(Debug, Default)]
struct GenerateContentDecoder {
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    saw_tool_call: bool,
    call_count: usize,
}

impl StreamDecoder for GenerateContentDecoder {
    fn decode(&mut self, event: &Event) -> ProviderResult<Vec<ModelEvent>> {
        let chunk: GenerateContentChunk = parse_data(event)?;
        if let Some(usage) = chunk.usage_metadata {
            self.usage = Some(Usage::new(
                usage.prompt_token_count,
                usage.candidates_token_count + usage.thoughts_token_count,
            ));
        }

        let mut events = Vec::new();
        // Only the first candidate is streamed
        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return Ok(events);
        };

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(call) = part.function_call {
                self.call_count += 1;
                self.saw_tool_call = true;
                events.push(ModelEvent::ToolCall {
                    id: format!("call_{}", self.call_count),
                    name: call.name,
                    input: call.args,
                });
                continue;
            }
            match part.text {
                Some(text) if !text.is_empty() && part.thought => {
                    events.push(ModelEvent::ThinkingDelta(text))
                }
                Some(text) if !text.is_empty() => events.push(ModelEvent::TextDelta(text)),
                _ => {}
            }
        }

        if let Some(reason) = candidate.finish_reason {
            self.finish_reason = Some(FinishReason::from_vendor(&reason));
        }
        Ok(events)
    }

    fn finish(&mut self) -> ProviderResult<Vec<ModelEvent>> {
        let Some(reason) = self.finish_reason else {
            return Err(truncated_stream());
        };
        // Gemini reports STOP even when it called a function
        let reason = if self.saw_tool_call && reason == FinishReason::Stop {
            FinishReason::ToolCalls
        } else {
            reason
        };
        Ok(vec![ModelEvent::Finish {
            reason,
            usage: self.usage,
        }])
    }
}
