//! Controller configuration loading.
//!
//! Precedence, lowest first: built-in defaults, JSON config file, environment,
//! command-line flags (applied by the binary).

use std::fs;
use std::path::Path;

use tessera_types::models::ControllerConfig;
use tessera_types::ConfigError;

/// Config file name looked up in the working directory when no path is given.
pub const CONFIG_FILE: &str = "tessera.json";

pub const ENV_DATABASE_URL: &str = "TESSERA_DATABASE_URL";
pub const ENV_LISTEN: &str = "TESSERA_LISTEN";
pub const ENV_API_LISTEN: &str = "TESSERA_API_LISTEN";

/// Parse a config file without validating it. A missing file yields defaults.
pub fn read_config(path: &Path) -> Result<ControllerConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(ControllerConfig::default());
    }
    let content = fs::read_to_string(path).map_err(|e| ConfigError::from_io_error(path, &e))?;
    serde_json::from_str(&content).map_err(|e| ConfigError::from_json_error(&e))
}

/// Parse and validate a config file.
pub fn load_config(path: &Path) -> Result<ControllerConfig, ConfigError> {
    let config = read_config(path)?;
    config.check()?;
    Ok(config)
}

/// Apply `TESSERA_*` overrides from `lookup` (normally the process environment).
pub fn apply_env_overrides<F>(config: &mut ControllerConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    if let Some(url) = present(ENV_DATABASE_URL) {
        config.store.database_url = url;
    }
    if let Some(addr) = present(ENV_LISTEN) {
        config.listen_addr = addr;
    }
    if let Some(addr) = present(ENV_API_LISTEN) {
        config.api_addr = addr;
    }
}
