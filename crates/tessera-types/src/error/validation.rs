//! Write-time validation errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised synchronously to a writer before any state change.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ValidationError {
    /// Entity or namespace name is empty, too long, or has forbidden characters
    #[error("Invalid {field} '{value}': {message}")]
    InvalidName {
        /// Which name was rejected (namespace, name, listener)
        field: String,
        /// The rejected value
        value: String,
        /// Why the value was rejected
        message: String,
    },

    /// CIDR string is not in network/prefix-length notation
    #[error("Invalid CIDR '{cidr}': {message}")]
    InvalidCidr {
        /// The rejected CIDR string
        cidr: String,
        /// Parser diagnostic
        message: String,
    },

    /// Host address is missing
    #[error("Invalid host address '{value}'")]
    InvalidHostAddr {
        /// The rejected value
        value: String,
    },

    /// CIDR overlaps a subnet already owned by another edge in the namespace
    #[error("CIDR {cidr} conflicts with edge '{existing_edge}' ({existing_cidr})")]
    CidrConflict {
        /// The CIDR being added
        cidr: String,
        /// Name of the edge that already owns an overlapping subnet
        existing_edge: String,
        /// The overlapping subnet
        existing_cidr: String,
    },
}

impl ValidationError {
    /// Whether the error is a conflict with existing state rather than malformed input.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::CidrConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_conflict() {
        let conflict = ValidationError::CidrConflict {
            cidr: "10.0.0.0/8".to_string(),
            existing_edge: "e1".to_string(),
            existing_cidr: "10.1.0.0/16".to_string(),
        };
        let malformed =
            ValidationError::InvalidCidr { cidr: "x".to_string(), message: "bad".to_string() };

        assert!(conflict.is_conflict());
        assert!(!malformed.is_conflict());
    }
}
