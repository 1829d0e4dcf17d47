//! Core error types.

use thiserror::Error;

/// Errors raised while decoding, encoding or parsing envelope fields.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An inbound frame was not a valid message.
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    /// A message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    /// A role string was neither `publisher` nor `subscriber`.
    #[error("unknown role: {0:?}")]
    UnknownRole(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
