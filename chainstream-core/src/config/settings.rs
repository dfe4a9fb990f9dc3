//! Per-provider settings resolution
//!
//! Adapters ask a [`SettingsResolver`] for credentials right before each model
//! creation. [`CachedSettingsResolver`] puts a short TTL cache in front of a
//! [`SettingsBackend`] and falls back to environment variables when the
//! backend errors or has no entry for the provider.

use super::error::ConfigError;
use super::schema::EngineConfig;
use super::secrets::{SafeLogging, SecretString};
use crate::error::ExecutionError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Resolved credentials and endpoint for one provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderSettings {
    pub provider: String,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub region: Option<String>,
}

impl ProviderSettings {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, key: impl Into<SecretString>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// The API key, or a configuration error naming the provider
    pub fn require_api_key(&self) -> Result<&SecretString, ExecutionError> {
        self.api_key
            .as_ref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ExecutionError::Configuration(format!(
                    "no API key configured for provider '{}'",
                    self.provider
                ))
            })
    }

    /// Fill unset fields from another source
    fn or(mut self, fallback: ProviderSettings) -> Self {
        self.api_key = self.api_key.or(fallback.api_key);
        self.base_url = self.base_url.or(fallback.base_url);
        self.region = self.region.or(fallback.region);
        self
    }

    fn is_empty(&self) -> bool {
        self.api_key.is_none() && self.base_url.is_none() && self.region.is_none()
    }
}

impl SafeLogging for ProviderSettings {
    fn safe_for_logging(&self) -> String {
        format!(
            "ProviderSettings {{ provider: {}, api_key: {}, base_url: {:?}, region: {:?} }}",
            self.provider,
            self.api_key
                .as_ref()
                .map(SecretString::partial_redact)
                .unwrap_or_else(|| "[NONE]".to_string()),
            self.base_url,
            self.region,
        )
    }
}

/// Source of provider settings consulted by adapters
pub trait SettingsResolver: Send + Sync {
    /// Settings for a provider, if any are known
    fn resolve(&self, provider: &str) -> Option<ProviderSettings>;
}

/// Backing store behind a [`CachedSettingsResolver`]
pub trait SettingsBackend: Send + Sync {
    fn load(&self, provider: &str) -> Result<Option<ProviderSettings>, ConfigError>;
}

/// Settings served straight from an [`EngineConfig`]
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    providers: HashMap<String, ProviderSettings>,
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the enabled provider entries of a configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        let providers = config
            .providers
            .iter()
            .filter(|p| p.enabled)
            .map(|p| {
                let key = p.name.to_ascii_lowercase();
                let settings = ProviderSettings {
                    provider: key.clone(),
                    api_key: p.api_key.clone(),
                    base_url: p.base_url.clone(),
                    region: p.region.clone(),
                };
                (key, settings)
            })
            .collect();
        Self { providers }
    }

    pub fn insert(mut self, settings: ProviderSettings) -> Self {
        self.providers
            .insert(settings.provider.to_ascii_lowercase(), settings);
        self
    }
}

impl SettingsResolver for StaticSettings {
    fn resolve(&self, provider: &str) -> Option<ProviderSettings> {
        self.providers.get(&provider.to_ascii_lowercase()).cloned()
    }
}

impl SettingsBackend for StaticSettings {
    fn load(&self, provider: &str) -> Result<Option<ProviderSettings>, ConfigError> {
        Ok(self.resolve(provider))
    }
}

/// Lookup function for environment variables
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment variable names holding a provider's API key
pub fn api_key_vars(provider: &str) -> Vec<String> {
    match provider {
        "openai" => vec!["OPENAI_API_KEY".to_string()],
        "anthropic" => vec!["ANTHROPIC_API_KEY".to_string()],
        "google" => vec!["GOOGLE_API_KEY".to_string(), "GEMINI_API_KEY".to_string()],
        other => vec![format!("{}_API_KEY", env_prefix(other))],
    }
}

fn env_prefix(provider: &str) -> String {
    provider
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Settings for a provider read from environment variables
pub fn env_settings(provider: &str, lookup: &EnvLookup) -> ProviderSettings {
    let provider = provider.to_ascii_lowercase();
    let prefix = env_prefix(&provider);
    let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

    ProviderSettings {
        api_key: api_key_vars(&provider)
            .iter()
            .find_map(|var| non_empty(var.as_str()))
            .map(SecretString::new),
        base_url: non_empty(&format!("{}_BASE_URL", prefix)),
        region: non_empty(&format!("{}_REGION", prefix)),
        provider,
    }
}

struct CacheEntry {
    settings: Option<ProviderSettings>,
    fetched_at: Instant,
}

/// TTL-cached resolver with environment fallback
pub struct CachedSettingsResolver<B> {
    backend: B,
    ttl: Duration,
    env: EnvLookup,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl<B: SettingsBackend> CachedSettingsResolver<B> {
    /// Resolver that falls back to the process environment
    pub fn new(backend: B, ttl: Duration) -> Self {
        Self::with_env(backend, ttl, Arc::new(|name: &str| std::env::var(name).ok()))
    }

    /// Resolver with a custom environment lookup
    pub fn with_env(backend: B, ttl: Duration, env: EnvLookup) -> Self {
        Self {
            backend,
            ttl,
            env,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drop the cached entry for one provider
    pub fn invalidate(&self, provider: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.remove(&provider.to_ascii_lowercase());
    }

    fn cached(&self, key: &str) -> Option<Option<ProviderSettings>> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.settings.clone())
    }
}

impl<B: SettingsBackend> SettingsResolver for CachedSettingsResolver<B> {
    fn resolve(&self, provider: &str) -> Option<ProviderSettings> {
        let key = provider.to_ascii_lowercase();
        if let Some(hit) = self.cached(&key) {
            return hit;
        }

        let from_env = env_settings(&key, &self.env);
        let resolved = match self.backend.load(&key) {
            Ok(Some(settings)) => {
                debug!(provider = %key, "Settings loaded from backend");
                Some(settings.or(from_env))
            }
            Ok(None) => (!from_env.is_empty()).then_some(from_env),
            Err(e) => {
                warn!(provider = %key, error = %e, "Settings backend failed, using environment");
                // Not cached, so the backend is retried on the next call
                return (!from_env.is_empty()).then_some(from_env);
            }
        };

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            key,
            CacheEntry {
                settings: resolved.clone(),
                fetched_at: Instant::now(),
            },
        );
        resolved
    }
}
