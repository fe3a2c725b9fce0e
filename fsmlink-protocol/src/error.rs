//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid UTF-8 in line")]
    InvalidUtf8,

    #[error("line too long: {size} bytes (max {max})")]
    LineTooLong { size: usize, max: usize },

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}
