//! Errors returned by the edge and route managers to administrative writers.

use thiserror::Error;

use crate::store::StoreError;
use tessera_types::ValidationError;

/// Failure of an administrative write or read against the topology.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TopologyError {
    /// Malformed input or CIDR conflict; nothing was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An entity with this name already exists in the namespace.
    #[error("{kind} '{name}' already exists in namespace '{namespace}'")]
    AlreadyExists { kind: &'static str, namespace: String, name: String },

    /// Concurrent writers kept changing the namespace during admission.
    #[error("namespace '{namespace}' changed concurrently {attempts} times, giving up")]
    Contended { namespace: String, attempts: u32 },

    /// The store could not be reached or returned garbage.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl TopologyError {
    /// Whether the writer asked for something that contradicts existing state.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Validation(v) => v.is_conflict(),
            Self::AlreadyExists { .. } => true,
            Self::Contended { .. } | Self::Store(_) => false,
        }
    }
}

/// Result type alias for manager operations.
pub type TopologyResult<T> = Result<T, TopologyError>;
