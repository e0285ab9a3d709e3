//! Registry session policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct RegistryConfig {
    /// Per-session outbound queue bound; a session that falls this far behind is evicted
    #[validate(range(min = 1_usize, max = 1_048_576_usize))]
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Disconnect a session that has not sent a heartbeat for this long
    #[validate(range(min = 1_u64, max = 3600_u64))]
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    /// Time an agent has to send its hello after connecting
    #[validate(range(min = 1_u64, max = 300_u64))]
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Largest accepted or produced frame
    #[validate(range(min = 1024_usize))]
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl RegistryConfig {
    pub const fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

const fn default_queue_capacity() -> usize {
    1024
}

const fn default_heartbeat_timeout() -> u64 {
    30
}

const fn default_handshake_timeout() -> u64 {
    10
}

const fn default_max_frame_bytes() -> usize {
    4 * 1024 * 1024
}
