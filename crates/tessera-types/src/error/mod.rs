//! Typed error definitions for Tessera.
//!
//! This module provides a structured error hierarchy with specific error types
//! for different domains. All errors are designed to be:
//!
//! - **Serializable** for API responses via serde
//! - **Displayable** for logging via Display trait
//! - **Matchable** for error handling logic via enum variants

mod config;
mod protocol;
mod validation;

pub use config::ConfigError;
pub use protocol::ProtocolError;
pub use validation::ValidationError;
