//! Core domain models for the Tessera control plane.
//!
//! This module contains all shared data structures used across the controller,
//! the admin surfaces, and the agent protocol.

pub mod config;
mod edge;
mod name;
mod route;
mod topology;

// Re-export all models
pub use config::{
    ControllerConfig, LogConfig, RegistryConfig, StoreBackend, StoreConfig, DEFAULT_NAMESPACE,
};
pub use edge::Edge;
pub use name::{validate_name, MAX_NAME_LEN};
pub use route::Route;
pub use topology::NamespaceTopology;

/// A named entity partitioned by namespace and persisted under its own key.
///
/// Edges and routes share the same storage layout and watch/diff pipeline; this
/// trait is the seam between them.
pub trait Entity:
    Clone + PartialEq + std::fmt::Debug + serde::Serialize + serde::de::DeserializeOwned + Send + Sync
{
    /// Key segment identifying the entity kind (e.g. `edges`).
    const KIND: &'static str;

    fn namespace(&self) -> &str;

    fn name(&self) -> &str;
}
