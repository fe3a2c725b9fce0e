//! # fsmlink-client
//!
//! Controller library for fsmlink.
//!
//! This crate provides:
//! - An async TCP connection to a running interpreter
//! - Typed `SET_VARIABLE` / `STOP_FSM` commands
//! - A channel of outbound interpreter events

pub mod client;
pub mod connection;
pub mod error;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
