//! # fsmlink-server
//!
//! TCP transport for fsmlink.
//!
//! This crate provides:
//! - A server that runs one machine for one remote controller
//! - Session bookkeeping for the attached controller
//! - Configuration loading (YAML file + environment overrides)

pub mod config;
pub mod error;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError};
pub use error::ServerError;
pub use server::{outbound_message, Server, ServerConfig};
pub use session::Session;
