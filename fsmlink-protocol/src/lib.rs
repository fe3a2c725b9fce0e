//! # fsmlink-protocol
//!
//! Wire protocol spoken between an fsmlink interpreter and its controller.
//!
//! This crate provides:
//! - The `{type, payload}` message envelope
//! - Typed inbound (controller -> interpreter) and outbound messages
//! - Line-delimited JSON encoding and an incremental line decoder

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{encode_line, LineDecoder};
pub use error::ProtocolError;
pub use message::{Envelope, InboundMessage, OutboundMessage};

/// Default port the interpreter listens on.
pub const DEFAULT_PORT: u16 = 65432;

/// Maximum length of a single line before the decoder gives up (1 MiB).
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;
