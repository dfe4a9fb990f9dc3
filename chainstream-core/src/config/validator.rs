//! Configuration validation utilities

use super::env::has_placeholder;
use super::error::{ValidationError, ValidationErrorKind};
use super::schema::EngineConfig;
use regex::Regex;
use std::collections::BTreeSet;

/// Configuration validator with rules that need more than the schema
pub struct ConfigValidator {
    /// Provider names the registry can serve, if known
    known_providers: Option<BTreeSet<String>>,
    /// Characters allowed in model id patterns
    pattern_syntax: Regex,
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigValidator {
    /// Create a new validator
    pub fn new() -> Self {
        Self {
            known_providers: None,
            pattern_syntax: Regex::new(r"^[A-Za-z0-9*._:/\-]+$").expect("valid pattern syntax"),
        }
    }

    /// Also reject provider entries the registry cannot serve
    pub fn with_known_providers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.known_providers = Some(
            names
                .into_iter()
                .map(|n| n.as_ref().to_ascii_lowercase())
                .collect(),
        );
        self
    }

    /// Validate a configuration with extended rules
    pub fn validate(&self, config: &EngineConfig) -> Result<(), ValidationError> {
        config.validate()?;

        self.validate_placeholders(config)?;
        self.validate_provider_names(config)?;
        self.validate_timeouts(config)?;

        Ok(())
    }

    /// Placeholders left after interpolation mean the value was never resolved
    fn validate_placeholders(&self, config: &EngineConfig) -> Result<(), ValidationError> {
        for (i, provider) in config.providers.iter().enumerate() {
            if let Some(key) = &provider.api_key {
                if has_placeholder(key.expose_secret()) {
                    return Err(ValidationError::new(
                        format!("providers[{}].api_key", i),
                        ValidationErrorKind::UnresolvedPlaceholder,
                    ));
                }
            }
            if let Some(base_url) = &provider.base_url {
                if has_placeholder(base_url) {
                    return Err(ValidationError::new(
                        format!("providers[{}].base_url", i),
                        ValidationErrorKind::UnresolvedPlaceholder,
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_provider_names(&self, config: &EngineConfig) -> Result<(), ValidationError> {
        let Some(known) = &self.known_providers else {
            return Ok(());
        };

        for (i, provider) in config.providers.iter().enumerate() {
            if !known.contains(&provider.name.to_ascii_lowercase()) {
                return Err(ValidationError::new(
                    format!("providers[{}].name", i),
                    ValidationErrorKind::UnknownProvider {
                        name: provider.name.clone(),
                        known: known.iter().cloned().collect(),
                    },
                ));
            }
        }
        Ok(())
    }

    fn validate_timeouts(&self, config: &EngineConfig) -> Result<(), ValidationError> {
        let timeouts = &config.timeouts;

        for (i, pattern) in timeouts.heavy_reasoning_patterns.iter().enumerate() {
            if !self.pattern_syntax.is_match(pattern) {
                return Err(ValidationError::new(
                    format!("timeouts.heavy_reasoning_patterns[{}]", i),
                    ValidationErrorKind::InvalidPattern {
                        pattern: pattern.clone(),
                    },
                ));
            }
        }

        if timeouts.heavy_reasoning_ms < timeouts.base_ms {
            return Err(ValidationError::new(
                "timeouts.heavy_reasoning_ms",
                ValidationErrorKind::TimeoutBelowBase {
                    base_ms: timeouts.base_ms,
                },
            ));
        }

        Ok(())
    }

    /// Check whether a string is a usable model id glob
    pub fn is_valid_pattern(&self, pattern: &str) -> bool {
        self.pattern_syntax.is_match(pattern)
    }
}
