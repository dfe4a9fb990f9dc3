//! Model-family pattern matching shared by every adapter
//!
//! Patterns are glob-style: `*` matches any substring (including an empty
//! one) and matching ignores case. When several families match a model id,
//! the most specific pattern (most literal characters) wins; ties go to the
//! family listed first.

use super::adapter::ProviderCapabilities;
use std::collections::BTreeSet;

/// Static capability rule for one model family
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelFamily {
    pub pattern: &'static str,
    pub supports_reasoning: bool,
    pub supports_thinking: bool,
    pub max_thinking_tokens: u32,
    pub tools: &'static [&'static str],
    pub typical_latency_ms: u64,
    pub max_timeout_ms: u64,
    pub cost_per_input_token: f64,
    pub cost_per_output_token: f64,
    pub supports_images: bool,
}

impl ModelFamily {
    /// Capabilities declared by this family
    pub fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_reasoning: self.supports_reasoning,
            supports_thinking: self.supports_thinking,
            max_thinking_tokens: self.max_thinking_tokens,
            supported_tools: self.tools.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            typical_latency_ms: self.typical_latency_ms,
            max_timeout_ms: self.max_timeout_ms,
            cost_per_input_token: self.cost_per_input_token,
            cost_per_output_token: self.cost_per_output_token,
        }
    }

    /// Number of literal characters in the pattern
    pub fn specificity(&self) -> usize {
        self.pattern.chars().filter(|c| *c != '*').count()
    }
}

/// Case-insensitive glob match where `*` matches any substring
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let candidate = candidate.to_ascii_lowercase();

    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == candidate;
    }

    let first = segments[0];
    let last = segments[segments.len() - 1];
    if !candidate.starts_with(first) {
        return false;
    }
    if candidate.len() < first.len() + last.len() || !candidate.ends_with(last) {
        return false;
    }

    let mut rest = &candidate[first.len()..candidate.len() - last.len()];
    for segment in &segments[1..segments.len() - 1] {
        if segment.is_empty() {
            continue;
        }
        match rest.find(segment) {
            Some(pos) => rest = &rest[pos + segment.len()..],
            None => return false,
        }
    }
    true
}

/// Find the most specific family matching a model id
pub fn match_family<'a>(families: &'a [ModelFamily], model_id: &str) -> Option<&'a ModelFamily> {
    let mut best: Option<&ModelFamily> = None;
    for family in families {
        if !glob_match(family.pattern, model_id) {
            continue;
        }
        match best {
            Some(current) if current.specificity() >= family.specificity() => {}
            _ => best = Some(family),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAMILIES: &[ModelFamily] = &[
        ModelFamily {
            pattern: "claude-*",
            supports_reasoning: false,
            supports_thinking: false,
            max_thinking_tokens: 0,
            tools: &[],
            typical_latency_ms: 2000,
            max_timeout_ms: 60_000,
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
            supports_images: false,
        },
        ModelFamily {
            pattern: "claude-4*",
            supports_reasoning: true,
            supports_thinking: true,
            max_thinking_tokens: 32_000,
            tools: &["web_search"],
            typical_latency_ms: 4000,
            max_timeout_ms: 300_000,
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
            supports_images: false,
        },
    ];

    #[test]
    fn test_glob_basics() {
        assert!(glob_match("gpt-5*", "gpt-5"));
        assert!(glob_match("gpt-5*", "GPT-5-mini"));
        assert!(glob_match("*opus*", "anthropic.claude-opus-4-v1:0"));
        assert!(glob_match("gemini-*-pro*", "gemini-2.5-pro-preview"));
        assert!(!glob_match("gpt-5*", "gpt-4o"));
        assert!(!glob_match("o1", "o1-mini"));
        assert!(!glob_match("a*a", "a"));
    }

    #[test]
    fn test_most_specific_family_wins_regardless_of_order() {
        let family = match_family(FAMILIES, "claude-4-sonnet").unwrap();
        assert_eq!(family.pattern, "claude-4*");

        let fallback = match_family(FAMILIES, "claude-instant").unwrap();
        assert_eq!(fallback.pattern, "claude-*");

        assert!(match_family(FAMILIES, "llama-3").is_none());
    }
}
