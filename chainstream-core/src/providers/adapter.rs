//! Provider adapter trait and capabilities
//!
//! Each vendor is one [`ProviderAdapter`] implementation. Adapters declare
//! capabilities from static family tables, translate generic reasoning
//! options into vendor fields, and build [`ModelHandle`]s that perform the
//! actual streaming call.

use super::error::ProviderResult;
use super::patterns::{match_family, ModelFamily};
use crate::config::{SecretString, SettingsResolver};
use crate::error::{ExecutionError, ExecutionResult};
use crate::protocol::types::{
    CanonicalMessage, FinishReason, ReasoningEffort, ReasoningOptions, ToolDefinition, Usage,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Declared capabilities of one (provider, model) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapabilities {
    /// Does the model reason before answering?
    pub supports_reasoning: bool,

    /// Does the model expose a thinking-token budget?
    pub supports_thinking: bool,

    /// Upper bound for any thinking budget sent to the vendor
    pub max_thinking_tokens: u32,

    /// Vendor-hosted tools available to the model
    pub supported_tools: BTreeSet<String>,

    /// Typical end-to-end latency
    pub typical_latency_ms: u64,

    /// Longest call the vendor tolerates
    pub max_timeout_ms: u64,

    /// Cost per input token (USD)
    pub cost_per_input_token: f64,

    /// Cost per output token (USD)
    pub cost_per_output_token: f64,
}

impl ProviderCapabilities {
    /// Conservative defaults for unrecognized model ids
    pub fn conservative() -> Self {
        Self {
            supports_reasoning: false,
            supports_thinking: false,
            max_thinking_tokens: 0,
            supported_tools: BTreeSet::new(),
            typical_latency_ms: 2_000,
            max_timeout_ms: 60_000,
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
        }
    }

    /// Clamp a requested thinking budget to what the model accepts
    pub fn clamp_thinking_budget(&self, requested: u32) -> Option<u32> {
        if !self.supports_thinking || self.max_thinking_tokens == 0 {
            return None;
        }
        Some(requested.min(self.max_thinking_tokens))
    }
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self::conservative()
    }
}

/// Vendor-specific request fields derived from [`ReasoningOptions`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum VendorOptions {
    #[default]
    None,
    OpenAI {
        reasoning_effort: Option<ReasoningEffort>,
    },
    Anthropic {
        thinking_budget_tokens: Option<u32>,
    },
    Google {
        thinking_budget: Option<u32>,
        include_thoughts: bool,
    },
}

impl VendorOptions {
    /// Merge these options into a vendor request body
    pub fn apply(&self, body: &mut Value) {
        match self {
            VendorOptions::None => {}
            VendorOptions::OpenAI { reasoning_effort } => {
                if let Some(effort) = reasoning_effort {
                    body["reasoning_effort"] = json!(effort.as_str());
                }
            }
            VendorOptions::Anthropic {
                thinking_budget_tokens,
            } => {
                if let Some(budget) = thinking_budget_tokens {
                    body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
                }
            }
            VendorOptions::Google {
                thinking_budget,
                include_thoughts,
            } => {
                if thinking_budget.is_some() || *include_thoughts {
                    let mut config = json!({"includeThoughts": include_thoughts});
                    if let Some(budget) = thinking_budget {
                        config["thinkingBudget"] = json!(budget);
                    }
                    body["generationConfig"]["thinkingConfig"] = config;
                }
            }
        }
    }
}

/// Options applied when building a model handle
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    /// Overrides the endpoint resolved from settings
    pub base_url: Option<String>,

    /// Extra headers sent with every call
    pub extra_headers: HashMap<String, String>,
}

/// One normalized call to a model
#[derive(Debug, Clone)]
pub struct ModelCall {
    pub request_id: Uuid,
    pub messages: Vec<CanonicalMessage>,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub tools: Vec<ToolDefinition>,
    pub vendor_options: VendorOptions,
}

/// Event decoded from a vendor stream
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    TextDelta(String),
    ReasoningDelta(String),
    ThinkingDelta(String),
    ToolCall {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        id: String,
        output: Value,
    },
    ToolError {
        id: String,
        error: String,
    },
    Finish {
        reason: FinishReason,
        usage: Option<Usage>,
    },
}

/// Stream of decoded vendor events
pub type ModelEventStream = BoxStream<'static, ProviderResult<ModelEvent>>;

/// A model that can be streamed
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Canonical provider name
    fn provider(&self) -> &str;

    /// Model identifier
    fn model_id(&self) -> &str;

    /// Issue the vendor call and return its event stream
    ///
    /// Errors before the first event are returned directly; errors after
    /// that arrive as stream items.
    async fn stream(&self, call: ModelCall) -> ExecutionResult<ModelEventStream>;
}

/// Shared handle to a model
pub type ModelHandle = Arc<dyn LanguageModel>;

/// Resolved image-generation model
#[derive(Debug, Clone, PartialEq)]
pub struct ImageModel {
    pub provider: String,
    pub model_id: String,
    pub endpoint: String,
}

/// Core adapter trait that every vendor implements
pub trait ProviderAdapter: Send + Sync {
    /// Canonical provider name
    fn name(&self) -> &str;

    /// Known model families, in any order
    fn families(&self) -> &'static [ModelFamily];

    /// Build a streaming model handle
    fn create_model(&self, model_id: &str, options: &ModelOptions) -> ExecutionResult<ModelHandle>;

    /// Build an image-generation model handle
    fn create_image_model(
        &self,
        model_id: &str,
        options: &ModelOptions,
    ) -> ExecutionResult<ImageModel> {
        let _ = options;
        Err(ExecutionError::UnsupportedOperation(format!(
            "provider '{}' has no image models (requested '{}')",
            self.name(),
            model_id
        )))
    }

    /// Translate generic reasoning knobs into vendor fields
    fn provider_options(&self, model_id: &str, options: &ReasoningOptions) -> VendorOptions;

    /// Capabilities of a model, from the most specific matching family
    fn capabilities(&self, model_id: &str) -> ProviderCapabilities {
        match_family(self.families(), model_id)
            .map(ModelFamily::capabilities)
            .unwrap_or_else(ProviderCapabilities::conservative)
    }

    /// Whether any known family covers this model id
    fn supports_model(&self, model_id: &str) -> bool {
        match_family(self.families(), model_id).is_some()
    }
}

/// Thinking budget for a call, clamped to what the model accepts
///
/// An explicit budget wins over an effort level. Effort levels map to
/// 2048/8192/16384 tokens. Returns `None` when neither knob is set or the
/// model has no thinking mode.
pub(crate) fn thinking_budget_for(
    capabilities: &ProviderCapabilities,
    options: &ReasoningOptions,
    floor: u32,
) -> Option<u32> {
    let requested = options
        .thinking_budget
        .or_else(|| options.reasoning_effort.map(effort_budget))?;
    capabilities
        .clamp_thinking_budget(requested)
        .map(|budget| budget.max(floor.min(capabilities.max_thinking_tokens)))
}

fn effort_budget(effort: ReasoningEffort) -> u32 {
    match effort {
        ReasoningEffort::Low => 2_048,
        ReasoningEffort::Medium => 8_192,
        ReasoningEffort::High => 16_384,
    }
}

/// Effort level implied by a thinking budget, for effort-only vendors
pub(crate) fn effort_for_budget(budget: u32) -> ReasoningEffort {
    match budget {
        0..=4_096 => ReasoningEffort::Low,
        4_097..=12_288 => ReasoningEffort::Medium,
        _ => ReasoningEffort::High,
    }
}

/// Credentials and endpoint an adapter needs to build a model
#[derive(Debug, Clone)]
pub(crate) struct ResolvedEndpoint {
    pub api_key: SecretString,
    pub base_url: String,
}

/// Resolve credentials for a provider at model creation time
///
/// The endpoint comes from the call options, then settings, then the
/// vendor default.
pub(crate) fn resolve_endpoint(
    settings: &dyn SettingsResolver,
    provider: &str,
    options: &ModelOptions,
    default_base_url: &str,
) -> ExecutionResult<ResolvedEndpoint> {
    let resolved = settings.resolve(provider).ok_or_else(|| {
        ExecutionError::Configuration(format!("no settings available for provider '{}'", provider))
    })?;
    let api_key = resolved.require_api_key()?.clone();
    let base_url = options
        .base_url
        .clone()
        .or(resolved.base_url)
        .unwrap_or_else(|| default_base_url.to_string());

    Ok(ResolvedEndpoint {
        api_key,
        base_url: base_url.trim_end_matches('/').to_string(),
    })
}

/// Reject model ids no vendor would accept
pub(crate) fn check_model_id(provider: &str, model_id: &str) -> ExecutionResult<()> {
    let valid = !model_id.is_empty()
        && model_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '/' | '@'));
    if valid {
        Ok(())
    } else {
        Err(ExecutionError::provider(
            provider,
            super::error::ProviderError::ModelNotAvailable {
                model: model_id.to_string(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;

    struct OneProvider(ProviderSettings);

    impl SettingsResolver for OneProvider {
        fn resolve(&self, provider: &str) -> Option<ProviderSettings> {
            (provider == self.0.provider).then(|| self.0.clone())
        }
    }

    #[test]
    fn test_resolve_endpoint_precedence() {
        let settings = OneProvider(
            ProviderSettings::new("anthropic")
                .with_api_key("sk-ant")
                .with_base_url("https://gateway.example/anthropic/")
                .with_region("eu-west-1"),
        );

        let endpoint =
            resolve_endpoint(&settings, "anthropic", &ModelOptions::default(), "https://api.anthropic.com/v1")
                .unwrap();
        assert_eq!(endpoint.base_url, "https://gateway.example/anthropic");
        assert_eq!(endpoint.api_key.expose_secret(), "sk-ant");

        let options = ModelOptions {
            base_url: Some("http://127.0.0.1:9000/".to_string()),
            ..ModelOptions::default()
        };
        let endpoint = resolve_endpoint(&settings, "anthropic", &options, "unused").unwrap();
        assert_eq!(endpoint.base_url, "http://127.0.0.1:9000");

        let err = resolve_endpoint(&settings, "google", &options, "unused").unwrap_err();
        assert!(matches!(err, ExecutionError::Configuration(_)));
    }

    #[test]
    fn test_clamp_thinking_budget() {
        let mut caps = ProviderCapabilities::conservative();
        assert_eq!(caps.clamp_thinking_budget(10_000), None);

        caps.supports_thinking = true;
        caps.max_thinking_tokens = 8_192;
        assert_eq!(caps.clamp_thinking_budget(10_000), Some(8_192));
        assert_eq!(caps.clamp_thinking_budget(1_024), Some(1_024));
    }

    #[test]
    fn test_vendor_options_apply() {
        let mut body = json!({"model": "claude-opus-4"});
        VendorOptions::Anthropic {
            thinking_budget_tokens: Some(4096),
        }
        .apply(&mut body);
        assert_eq!(body["thinking"]["budget_tokens"], 4096);

        let mut body = json!({"contents": []});
        VendorOptions::Google {
            thinking_budget: Some(1024),
            include_thoughts: true,
        }
        .apply(&mut body);
        assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingBudget"], 1024);
    }

    #[test]
    fn test_thinking_budget_clamped_and_floored() {
        let mut caps = ProviderCapabilities::conservative();
        caps.supports_thinking = true;
        caps.max_thinking_tokens = 10_000;

        let explicit = ReasoningOptions {
            reasoning_effort: Some(ReasoningEffort::Low),
            thinking_budget: Some(50_000),
        };
        assert_eq!(thinking_budget_for(&caps, &explicit, 1_024), Some(10_000));

        let tiny = ReasoningOptions {
            reasoning_effort: None,
            thinking_budget: Some(10),
        };
        assert_eq!(thinking_budget_for(&caps, &tiny, 1_024), Some(1_024));

        let effort = ReasoningOptions {
            reasoning_effort: Some(ReasoningEffort::Medium),
            thinking_budget: None,
        };
        assert_eq!(thinking_budget_for(&caps, &effort, 0), Some(8_192));
        assert_eq!(thinking_budget_for(&caps, &ReasoningOptions::default(), 0), None);
        assert_eq!(effort_for_budget(20_000), ReasoningEffort::High);
    }

    #[test]
    fn test_check_model_id() {
        assert!(check_model_id("openai", "gpt-4o-2024-08-06").is_ok());
        assert!(check_model_id("anthropic", "anthropic.claude-opus-4-v1:0").is_ok());
        assert!(check_model_id("openai", "").is_err());
        assert!(check_model_id("openai", "gpt 4").is_err());
    }
}
