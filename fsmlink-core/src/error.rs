//! Core error types.

use thiserror::Error;

/// Errors raised while building or loading a machine.
///
/// These are construction-time errors: they are returned by the call that
/// caused them and never reach the run loop.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("state with name '{name}' already exists")]
    DuplicateState { name: String },

    #[error("multiple start states defined: '{existing}' and '{rejected}'")]
    MultipleStartStates { existing: String, rejected: String },

    #[error("no start state defined")]
    NoStartState,

    #[error("transition from '{from}' targets unknown state '{to}'")]
    UnknownTarget { from: String, to: String },

    #[error("invalid machine definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("invalid guard expression: {reason}")]
    InvalidGuard { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CoreError {
    /// Returns a stable error code for logs and protocol messages.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::DuplicateState { .. } => "DUPLICATE_STATE",
            CoreError::MultipleStartStates { .. } => "MULTIPLE_START_STATES",
            CoreError::NoStartState => "NO_START_STATE",
            CoreError::UnknownTarget { .. } => "UNKNOWN_TARGET",
            CoreError::InvalidDefinition { .. } => "BAD_DEFINITION",
            CoreError::InvalidGuard { .. } => "BAD_GUARD",
            CoreError::Io(_) => "IO_ERROR",
            CoreError::Json(_) | CoreError::Yaml(_) => "BAD_DEFINITION",
        }
    }
}

/// A fault raised by a user-supplied guard or action.
///
/// Faults are fatal to the run: the interpreter reports them once and stops.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ActionError {
    message: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}
