//! Logging configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct LogConfig {
    /// Default filter directive, overridden by RUST_LOG
    #[validate(length(min = 1_u64))]
    #[serde(default = "default_level")]
    pub level: String,
    /// Directory for daily-rotated log files; stderr only when unset
    #[serde(default)]
    pub dir: Option<String>,
    /// Rotated files kept on disk
    #[validate(range(min = 1_usize, max = 365_usize))]
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_level(), dir: None, max_files: default_max_files() }
    }
}

fn default_level() -> String {
    "info".to_string()
}

const fn default_max_files() -> usize {
    7
}
