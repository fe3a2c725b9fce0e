//! JSON message types.
//!
//! Every message on the wire is a single JSON object:
//!
//! ```json
//! {"type": "SET_VARIABLE", "payload": {"name": "counter", "value": 3}}
//! ```

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Untyped message envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag.
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Type-specific payload.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(msg_type: impl Into<String>, payload: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload,
        }
    }
}

/// Messages sent by the controller to the interpreter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    /// Write a variable in the interpreter's store.
    SetVariable { name: String, value: Value },
    /// Stop the interpreter.
    StopFsm {},
}

impl InboundMessage {
    pub const SET_VARIABLE: &'static str = "SET_VARIABLE";
    pub const STOP_FSM: &'static str = "STOP_FSM";

    pub fn set_variable(name: impl Into<String>, value: impl Into<Value>) -> Self {
        InboundMessage::SetVariable {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn stop() -> Self {
        InboundMessage::StopFsm {}
    }
}

impl TryFrom<Envelope> for InboundMessage {
    type Error = ProtocolError;

    /// Interprets an envelope leniently: a missing payload is treated as
    /// empty and a missing `value` as `null`.
    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        match envelope.msg_type.as_str() {
            Self::SET_VARIABLE => {
                let name = envelope
                    .payload
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or(ProtocolError::MissingField("name"))?
                    .to_string();
                let value = envelope.payload.get("value").cloned().unwrap_or(Value::Null);
                Ok(InboundMessage::SetVariable { name, value })
            }
            Self::STOP_FSM => Ok(InboundMessage::StopFsm {}),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

/// Notifications sent by the interpreter to the controller.
///
/// `delay` in [`OutboundMessage::TransitionTaken`] is in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    FsmConnected {
        message: String,
    },
    FsmStarted {
        start_state: String,
    },
    CurrentState {
        name: String,
        is_finish: bool,
    },
    VariableUpdate {
        name: String,
        value: Value,
    },
    StateActionExecuted {
        state_name: String,
    },
    TransitionTaken {
        from_state: String,
        to_state: String,
        delay: u64,
    },
    TransitionActionExecuted {
        from_state: String,
        to_state: String,
    },
    FsmFinished {
        finish_state: String,
    },
    FsmStuck {
        state_name: String,
    },
    FsmError {
        message: String,
    },
    FsmStopped {
        message: String,
    },
}

impl OutboundMessage {
    /// Returns the wire type tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::FsmConnected { .. } => "FSM_CONNECTED",
            OutboundMessage::FsmStarted { .. } => "FSM_STARTED",
            OutboundMessage::CurrentState { .. } => "CURRENT_STATE",
            OutboundMessage::VariableUpdate { .. } => "VARIABLE_UPDATE",
            OutboundMessage::StateActionExecuted { .. } => "STATE_ACTION_EXECUTED",
            OutboundMessage::TransitionTaken { .. } => "TRANSITION_TAKEN",
            OutboundMessage::TransitionActionExecuted { .. } => "TRANSITION_ACTION_EXECUTED",
            OutboundMessage::FsmFinished { .. } => "FSM_FINISHED",
            OutboundMessage::FsmStuck { .. } => "FSM_STUCK",
            OutboundMessage::FsmError { .. } => "FSM_ERROR",
            OutboundMessage::FsmStopped { .. } => "FSM_STOPPED",
        }
    }

    /// Returns whether this message ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutboundMessage::FsmFinished { .. }
                | OutboundMessage::FsmStuck { .. }
                | OutboundMessage::FsmError { .. }
                | OutboundMessage::FsmStopped { .. }
        )
    }
}
