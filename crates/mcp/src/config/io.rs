//! Configuration IO helpers for the provider registry.

use crate::config::{ConfigError, McpConfig, interpolate_config, validate_config};
use dirs_next::{config_dir, home_dir};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the registry location.
const CONFIG_PATH_ENV: &str = "FLEET_MCP_CONFIG";

/// Returns the default path for the provider registry file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("fleet").join("mcp.json")
}

/// Loads, interpolates, and validates the registry at `path`.
///
/// A missing file yields an empty registry. Entries that fail interpolation
/// or validation come back disabled with the reason in `err`; only an
/// unreadable or unparsable file is an error.
pub fn load_config_from_path(path: &Path) -> Result<McpConfig, ConfigError> {
    if !path.exists() {
        return Ok(McpConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let mut config: McpConfig = serde_json::from_str(&content)?;
    interpolate_config(&mut config)?;
    validate_config(&mut config);
    Ok(config)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}
