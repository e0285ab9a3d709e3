//! # Tessera Types
//!
//! Core types, models, and error definitions for the Tessera control plane.
//!
//! This crate provides the foundational type system shared by the controller, the
//! admin surfaces, and edge gateway agents:
//!
//! - **`error`** - Typed error hierarchy for validation, configuration, and protocol
//! - **`models`** - Domain models (Edge, Route, NamespaceTopology, ControllerConfig)
//! - **`protocol`** - Registry wire messages exchanged with edge gateway agents
//!
//! ## Architecture Role
//!
//! `tessera-types` sits at the bottom of the dependency graph:
//!
//! ```text
//!               tessera-types (this crate)
//!                       │
//!                       ▼
//!                 tessera-core
//!                       │
//!                       ▼
//!                tessera-server
//! ```
//!
//! All types are designed to be:
//! - **Serializable** via serde for the store, the REST API, and the agent protocol
//! - **Clone** for cheap sharing across async boundaries
//! - **PartialEq** for change detection and testing

pub mod error;
pub mod models;
pub mod protocol;

// Re-export error types for convenience
pub use error::{ConfigError, ProtocolError, ValidationError};

// Re-export core model types
pub use models::{validate_name, ControllerConfig, Edge, Entity, NamespaceTopology, Route};
pub use protocol::{AgentMessage, ServerMessage};
