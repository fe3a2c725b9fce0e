//! High-level controller API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use fsmlink_protocol::{InboundMessage, OutboundMessage};
use serde_json::Value;
use tokio::sync::mpsc;

/// Controller for a remote interpreter.
pub struct Client {
    connection: Connection,
}

impl Client {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            connection: Connection::new(config),
        }
    }

    /// Connects and returns the stream of interpreter events.
    pub async fn connect(&self) -> Result<mpsc::UnboundedReceiver<OutboundMessage>, ClientError> {
        self.connection.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub async fn close(&self) -> Result<(), ClientError> {
        self.connection.close().await
    }

    /// Writes a variable in the interpreter.
    pub async fn set_variable(
        &self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), ClientError> {
        self.connection
            .send(&InboundMessage::set_variable(name, value))
            .await
    }

    /// Asks the interpreter to stop.
    pub async fn stop_fsm(&self) -> Result<(), ClientError> {
        self.connection.send(&InboundMessage::stop()).await
    }
}
