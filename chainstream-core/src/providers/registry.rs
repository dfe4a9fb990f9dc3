//! Provider registry
//!
//! Maps provider names and aliases onto adapters. Lookups ignore case. An
//! alias may name several candidate providers; model-aware resolution picks
//! the first candidate whose families cover the model.

use super::adapter::ProviderAdapter;
use super::anthropic::AnthropicAdapter;
use super::google::GoogleAdapter;
use super::openai::OpenAIAdapter;
use crate::config::SettingsResolver;
use crate::error::{ExecutionError, ExecutionResult};
use crate::http::HttpClient;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Shared adapter handle
pub type AdapterHandle = Arc<dyn ProviderAdapter>;

/// Registry of provider adapters
#[derive(Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, AdapterHandle>,
    aliases: HashMap<String, Vec<String>>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in vendors and their aliases
    pub fn with_defaults(settings: Arc<dyn SettingsResolver>, http: HttpClient) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OpenAIAdapter::new(settings.clone(), http.clone())));
        registry.register(Arc::new(AnthropicAdapter::new(settings.clone(), http.clone())));
        registry.register(Arc::new(GoogleAdapter::new(settings, http)));

        registry.alias("claude", &["anthropic"]);
        registry.alias("bedrock", &["anthropic"]);
        registry.alias("gemini", &["google"]);
        registry.alias("vertex", &["google", "anthropic"]);
        registry
    }

    /// Register an adapter under its own name, replacing any previous one
    pub fn register(&mut self, adapter: AdapterHandle) {
        let name = normalize(adapter.name());
        debug!(provider = %name, "Registering provider adapter");
        self.adapters.insert(name, adapter);
    }

    /// Map an alias onto one or more provider names, in preference order
    pub fn alias(&mut self, alias: &str, targets: &[&str]) {
        self.aliases
            .insert(normalize(alias), targets.iter().map(|t| normalize(t)).collect());
    }

    /// Resolve a provider name or alias
    pub fn resolve(&self, name: &str) -> ExecutionResult<AdapterHandle> {
        self.candidates(name)
            .into_iter()
            .next()
            .ok_or_else(|| ExecutionError::UnknownProvider(name.to_string()))
    }

    /// Resolve a provider name or alias for a specific model
    ///
    /// Falls back to the first candidate when none claims the model.
    pub fn resolve_for_model(&self, name: &str, model_id: &str) -> ExecutionResult<AdapterHandle> {
        let candidates = self.candidates(name);
        if let Some(adapter) = candidates.iter().find(|a| a.supports_model(model_id)) {
            return Ok(adapter.clone());
        }
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| ExecutionError::UnknownProvider(name.to_string()))
    }

    /// Every name and alias that resolves to a registered adapter
    pub fn list_supported(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.adapters.keys().cloned().collect();
        names.extend(
            self.aliases
                .iter()
                .filter(|(_, targets)| targets.iter().any(|t| self.adapters.contains_key(t)))
                .map(|(alias, _)| alias.clone()),
        );
        names
    }

    /// Whether a name or alias resolves
    pub fn is_supported(&self, name: &str) -> bool {
        !self.candidates(name).is_empty()
    }

    fn candidates(&self, name: &str) -> Vec<AdapterHandle> {
        let key = normalize(name);
        if let Some(adapter) = self.adapters.get(&key) {
            return vec![adapter.clone()];
        }
        self.aliases
            .get(&key)
            .map(|targets| {
                targets
                    .iter()
                    .filter_map(|t| self.adapters.get(t).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
