//! Protocol module for chain execution request/response structures
//!
//! This module defines the canonical data models exchanged with callers:
//! - Loose caller messages and the canonical parts representation
//! - The stream request accepted by the orchestrator
//! - The server-sent event wire format relayed back to callers

pub mod events;
pub mod types;

pub use events::{accumulate_text, parse_sse_body, StreamEvent, TextAccumulator};
pub use types::{
    CanonicalMessage, ContentPart, FinishReason, MessageRole, RawMessage, ReasoningEffort,
    ReasoningOptions, StreamRequest, ToolDefinition, Usage,
};
