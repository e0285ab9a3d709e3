//! Agent protocol errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors on a registry session, from the handshake through steady state.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ProtocolError {
    /// Frame could not be decoded into a protocol message
    #[error("Malformed frame: {message}")]
    MalformedFrame {
        /// Decoder diagnostic
        message: String,
    },

    /// First frame was not an identity handshake
    #[error("Expected hello handshake, got {got}")]
    HandshakeExpected {
        /// Kind of the frame that arrived instead
        got: String,
    },

    /// Agent did not identify itself in time
    #[error("Handshake timed out after {secs}s")]
    HandshakeTimeout {
        /// Configured handshake timeout
        secs: u64,
    },

    /// Agent identified as an edge the controller does not know
    #[error("Unknown edge '{edge}' in namespace '{namespace}'")]
    UnknownEdge {
        /// Namespace from the handshake
        namespace: String,
        /// Edge name from the handshake
        edge: String,
    },

    /// Agent stopped sending heartbeats
    #[error("Heartbeat timeout after {secs}s")]
    HeartbeatTimeout {
        /// Configured heartbeat timeout
        secs: u64,
    },

    /// Transport closed or failed
    #[error("Transport error: {message}")]
    Transport {
        /// Underlying I/O diagnostic
        message: String,
    },
}

impl ProtocolError {
    /// Whether the agent should simply reconnect and resync after this error.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. } | Self::HeartbeatTimeout { .. } | Self::Transport { .. }
        )
    }
}
