//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] fsmlink_protocol::ProtocolError),

    #[error("core error: {0}")]
    Core(#[from] fsmlink_core::CoreError),

    #[error("write to controller timed out after {0:?}")]
    WriteTimeout(std::time::Duration),

    #[error("task failed: {0}")]
    TaskFailed(String),
}

impl ServerError {
    /// Returns whether this error means the controller went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ServerError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            ServerError::WriteTimeout(_) => true,
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(e: tokio::task::JoinError) -> Self {
        ServerError::TaskFailed(e.to_string())
    }
}
