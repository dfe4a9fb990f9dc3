//! Adaptive per-call timeouts
//!
//! The deadline depends on what the model declares it does: heavy reasoning
//! families get the longest budget, then extended thinking, then plain
//! reasoning. A caller-supplied timeout only applies to models that do
//! neither.

use crate::config::TimeoutSettings;
use crate::providers::{glob_match, ProviderCapabilities};
use std::fmt;
use std::time::Duration;

/// Which rule produced a timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutTier {
    HeavyReasoning,
    Thinking,
    Reasoning,
    Explicit,
    Base,
}

impl fmt::Display for TimeoutTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::HeavyReasoning => "heavy_reasoning",
            Self::Thinking => "thinking",
            Self::Reasoning => "reasoning",
            Self::Explicit => "explicit",
            Self::Base => "base",
        })
    }
}

/// A computed timeout and the rule behind it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTimeout {
    pub duration: Duration,
    pub tier: TimeoutTier,
}

/// Timeout policy built from [`TimeoutSettings`]
#[derive(Debug, Clone, Default)]
pub struct AdaptiveTimeout {
    settings: TimeoutSettings,
}

impl AdaptiveTimeout {
    pub fn new(settings: TimeoutSettings) -> Self {
        Self { settings }
    }

    /// Whether a model id belongs to a heavy reasoning family
    pub fn is_heavy_reasoning(&self, model_id: &str) -> bool {
        self.settings
            .heavy_reasoning_patterns
            .iter()
            .any(|pattern| glob_match(pattern, model_id))
    }

    /// Pick the timeout for one call
    pub fn resolve(
        &self,
        model_id: &str,
        capabilities: &ProviderCapabilities,
        explicit: Option<Duration>,
    ) -> ResolvedTimeout {
        let (ms, tier) = if capabilities.supports_reasoning && self.is_heavy_reasoning(model_id) {
            (self.settings.heavy_reasoning_ms, TimeoutTier::HeavyReasoning)
        } else if capabilities.supports_thinking {
            (self.settings.thinking_ms, TimeoutTier::Thinking)
        } else if capabilities.supports_reasoning {
            (self.settings.reasoning_ms, TimeoutTier::Reasoning)
        } else if let Some(explicit) = explicit {
            return ResolvedTimeout {
                duration: explicit,
                tier: TimeoutTier::Explicit,
            };
        } else {
            (self.settings.base_ms, TimeoutTier::Base)
        };

        ResolvedTimeout {
            duration: Duration::from_millis(ms),
            tier,
        }
    }

    /// Timeout duration for one call
    pub fn compute(
        &self,
        model_id: &str,
        capabilities: &ProviderCapabilities,
        explicit: Option<Duration>,
    ) -> Duration {
        self.resolve(model_id, capabilities, explicit).duration
    }
}
