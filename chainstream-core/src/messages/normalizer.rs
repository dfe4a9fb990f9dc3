//! Canonicalization of caller message shapes
//!
//! Normalization never fails: a malformed message degrades to a single empty
//! text part and a warning, so one bad message cannot abort a whole chain.
//! [`validate`] reports the same problems for callers that prefer to reject.

use crate::protocol::types::{CanonicalMessage, ContentPart, MessageRole, RawMessage};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Advisory problems found in a caller message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageValidationError {
    #[error("invalid role '{role}': expected user, assistant or system")]
    InvalidRole { role: String },

    #[error("message has neither content nor parts")]
    MissingContent,
}

/// Convert a caller message into its canonical parts form
///
/// Resolution order: an explicit non-empty `parts` list passes through
/// unchanged, a string `content` becomes one text part, a list `content` is
/// read as the parts themselves, anything else becomes one empty text part.
pub fn normalize(message: &RawMessage) -> CanonicalMessage {
    let role = MessageRole::parse(&message.role).unwrap_or_else(|| {
        warn!(role = %message.role, "Unknown message role, treating as user");
        MessageRole::User
    });

    let parts = match (&message.parts, &message.content) {
        (Some(parts), _) if !parts.is_empty() => parts.clone(),
        (_, Some(Value::String(text))) => vec![ContentPart::text(text.clone())],
        (_, Some(Value::Array(items))) => parts_from_list(items),
        (_, Some(object @ Value::Object(_))) => parts_from_list(std::slice::from_ref(object)),
        _ => {
            warn!(role = %role, "Message has no usable content, substituting empty text");
            Vec::new()
        }
    };

    CanonicalMessage::new(role, parts, message.metadata.clone())
}

fn parts_from_list(items: &[Value]) -> Vec<ContentPart> {
    let mut parts = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match item {
            Value::String(text) => parts.push(ContentPart::text(text.clone())),
            other => match serde_json::from_value::<ContentPart>(other.clone()) {
                Ok(part) => parts.push(part),
                Err(e) => warn!(index, error = %e, "Dropping unrecognized content part"),
            },
        }
    }
    if parts.is_empty() {
        warn!("Content list produced no parts, substituting empty text");
    }
    parts
}

/// Report advisory problems with a caller message
pub fn validate(message: &RawMessage) -> Vec<MessageValidationError> {
    let mut errors = Vec::new();

    if MessageRole::parse(&message.role).is_none() {
        errors.push(MessageValidationError::InvalidRole {
            role: message.role.clone(),
        });
    }

    let has_parts = message.parts.as_ref().is_some_and(|p| !p.is_empty());
    let has_content = message.content.as_ref().is_some_and(|c| !c.is_null());
    if !has_parts && !has_content {
        errors.push(MessageValidationError::MissingContent);
    }

    errors
}

/// Concatenate the text parts of a message in order
pub fn extract_text(message: &CanonicalMessage) -> String {
    message
        .parts()
        .iter()
        .filter_map(ContentPart::as_text)
        .collect::<Vec<_>>()
        .join("")
}

/// Whether the message carries anything besides text
pub fn has_non_text_content(message: &CanonicalMessage) -> bool {
    message
        .parts()
        .iter()
        .any(|part| !matches!(part, ContentPart::Text { .. }))
}
