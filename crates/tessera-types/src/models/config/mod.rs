//! Controller configuration models.

mod log;
mod registry;
mod store;

pub use log::LogConfig;
pub use registry::RegistryConfig;
pub use store::{StoreBackend, StoreConfig};

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use validator::Validate;

use crate::error::ConfigError;

/// Namespace used by admin commands when none is given.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Full control-plane process configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ControllerConfig {
    /// Address edge gateway agents connect to
    #[validate(length(min = 1_u64))]
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Address of the REST admin API
    #[validate(length(min = 1_u64))]
    #[serde(default = "default_api_addr")]
    pub api_addr: String,
    /// Consistent store connection
    #[serde(default)]
    #[validate(nested)]
    pub store: StoreConfig,
    /// Registry session policy
    #[serde(default)]
    #[validate(nested)]
    pub registry: RegistryConfig,
    /// Logging setup
    #[serde(default)]
    #[validate(nested)]
    pub log: LogConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_addr: default_api_addr(),
            store: StoreConfig::default(),
            registry: RegistryConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Run derive validation plus the cross-field checks the derive cannot express.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate().map_err(|e| {
            let field = e.field_errors().keys().next().map_or_else(String::new, |k| k.to_string());
            ConfigError::ValidationError { field, message: e.to_string() }
        })?;

        parse_addr("listen_addr", &self.listen_addr)?;
        parse_addr("api_addr", &self.api_addr)?;

        if self.store.backend == StoreBackend::Postgres && self.store.database_url.is_empty() {
            return Err(ConfigError::ValidationError {
                field: "store.database_url".to_string(),
                message: "required for the postgres backend".to_string(),
            });
        }
        Ok(())
    }

    pub fn listen_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("listen_addr", &self.listen_addr)
    }

    pub fn api_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("api_addr", &self.api_addr)
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|e: std::net::AddrParseError| ConfigError::ValidationError {
        field: field.to_string(),
        message: format!("'{}': {}", value, e),
    })
}

fn default_listen_addr() -> String {
    "0.0.0.0:58422".to_string()
}

fn default_api_addr() -> String {
    "127.0.0.1:58420".to_string()
}
