//! Caller callbacks invoked while a stream is relayed
//!
//! Every hook returns a [`HookResult`]. Failures are logged and dropped so a
//! misbehaving consumer cannot break the stream it observes.

use crate::error::ExecutionError;
use crate::protocol::types::{FinishReason, Usage};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Error raised by caller hook code
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HookError {
    pub message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type HookResult = Result<(), HookError>;

/// Final outcome passed to [`StreamHooks::on_finish`]
#[derive(Debug, Clone, PartialEq)]
pub struct FinishOutcome {
    pub text: String,
    pub reasoning: String,
    pub usage: Option<Usage>,
    pub finish_reason: FinishReason,
}

/// Stream observer
///
/// Token hooks fire in arrival order. Exactly one of `on_finish` or
/// `on_error` fires, after the last token.
#[async_trait]
pub trait StreamHooks: Send + Sync {
    async fn on_progress(&self, _delta: &str) -> HookResult {
        Ok(())
    }

    async fn on_reasoning(&self, _delta: &str) -> HookResult {
        Ok(())
    }

    async fn on_thinking(&self, _delta: &str) -> HookResult {
        Ok(())
    }

    async fn on_tool_call(&self, _id: &str, _name: &str, _input: &Value) -> HookResult {
        Ok(())
    }

    async fn on_finish(&self, _outcome: &FinishOutcome) -> HookResult {
        Ok(())
    }

    async fn on_error(&self, _error: &ExecutionError) -> HookResult {
        Ok(())
    }
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl StreamHooks for NoopHooks {}

/// Log a hook failure without propagating it
pub(crate) fn report(hook: &'static str, result: HookResult) {
    if let Err(e) = result {
        warn!(hook, error = %e, "Stream hook failed");
    }
}
