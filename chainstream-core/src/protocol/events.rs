//! Server-sent event wire format for relayed streams
//!
//! Each event is one JSON object on a `data:` line, discriminated by `type`.
//! Text is accumulated strictly from `text-delta.delta` fields in arrival
//! order; an empty stream is `start` followed by `finish`.

use super::types::{FinishReason, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event of a relayed stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    Start {
        #[serde(default, rename = "messageId", skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(default)]
        input: Value,
    },
    ToolOutputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(default)]
        output: Value,
    },
    ToolOutputError {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "errorText")]
        error_text: String,
    },
    StartStep,
    FinishStep,
    Error {
        error: String,
        code: String,
    },
    Finish {
        #[serde(default, rename = "finishReason", skip_serializing_if = "Option::is_none")]
        finish_reason: Option<FinishReason>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl StreamEvent {
    /// Encode as one SSE frame (`data: {...}` followed by a blank line)
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }

    /// Decode the payload of a single `data:` line
    ///
    /// Accepts the line with or without the `data:` prefix.
    pub fn from_sse_data(line: &str) -> Result<Self, serde_json::Error> {
        let payload = line.trim();
        let payload = payload.strip_prefix("data:").unwrap_or(payload).trim_start();
        serde_json::from_str(payload)
    }

    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }
}

/// Parse every `data:` line of an SSE body, skipping comments and blank lines
pub fn parse_sse_body(body: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
    body.lines()
        .map(str::trim)
        .filter(|line| line.starts_with("data:"))
        .map(StreamEvent::from_sse_data)
        .collect()
}

/// Accumulates the visible text of a stream from its deltas
#[derive(Debug, Default, Clone)]
pub struct TextAccumulator {
    text: String,
    reasoning: String,
}

impl TextAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event; returns the text delta it contributed, if any
    pub fn push<'a>(&mut self, event: &'a StreamEvent) -> Option<&'a str> {
        match event {
            StreamEvent::TextDelta { delta, .. } => {
                self.text.push_str(delta);
                Some(delta.as_str())
            }
            StreamEvent::ReasoningDelta { delta, .. } => {
                self.reasoning.push_str(delta);
                None
            }
            _ => None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Accumulate the text of a complete event sequence
pub fn accumulate_text<'a>(events: impl IntoIterator<Item = &'a StreamEvent>) -> String {
    let mut accumulator = TextAccumulator::new();
    for event in events {
        accumulator.push(event);
    }
    accumulator.into_text()
}
