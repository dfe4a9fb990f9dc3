//! Message normalization
//!
//! Converts heterogeneous caller message shapes into [`CanonicalMessage`]s.
//!
//! [`CanonicalMessage`]: crate::protocol::CanonicalMessage

mod normalizer;

pub use normalizer::{
    extract_text, has_non_text_content, normalize, validate, MessageValidationError,
};
