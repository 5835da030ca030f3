//! Data models for the provider registry.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Registry of configured tool providers, keyed by provider id.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    /// Provider id to launch configuration, in file order.
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: IndexMap<String, McpServer>,
}

/// Launch configuration for a single provider process.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct McpServer {
    /// Executable to spawn; the provider speaks over its stdin/stdout.
    pub command: Option<String>,

    /// Arguments passed to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables set for the process.
    #[serde(default, deserialize_with = "deserialize_env_map")]
    pub env: IndexMap<String, String>,

    /// Variables that must be present (in `env` or the parent environment)
    /// before a launch is attempted.
    #[serde(default)]
    pub required_env: Vec<String>,

    /// Working directory for the process.
    pub cwd: Option<PathBuf>,

    /// Whether this provider is disabled.
    #[serde(default)]
    pub disabled: bool,

    /// Optional tags for display and filtering.
    pub tags: Option<Vec<String>>,

    /// Load-time problem that disabled this provider.
    #[serde(default, skip_serializing)]
    pub err: Option<String>,
}

impl McpServer {
    /// Stdio provider spawned from `command`.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: Some(command.into()),
            args,
            ..Default::default()
        }
    }

    pub fn is_stdio(&self) -> bool {
        self.command.is_some()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Required variables that are neither configured in `env` nor set in the
    /// parent process environment.
    pub fn missing_required_env(&self) -> Vec<String> {
        self.required_env
            .iter()
            .filter(|key| {
                let configured = self.env.get(key.as_str()).is_some_and(|value| !value.trim().is_empty());
                let inherited = std::env::var(key.as_str()).is_ok_and(|value| !value.trim().is_empty());
                !configured && !inherited
            })
            .cloned()
            .collect()
    }

    /// Human-readable launch line used in logs.
    pub fn command_line(&self) -> String {
        let mut line = self.command.clone().unwrap_or_default();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Deserialize)]
struct EnvEntry {
    key: String,
    value: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EnvVarCollection {
    Sequence(Vec<EnvEntry>),
    Map(IndexMap<String, String>),
}

/// Accept `env` either as `{"KEY": "value"}` or `[{"key": "KEY", "value": "value"}]`.
fn deserialize_env_map<'de, D>(deserializer: D) -> Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let maybe_collection = Option::<EnvVarCollection>::deserialize(deserializer)?;
    let mut map = IndexMap::new();
    match maybe_collection {
        Some(EnvVarCollection::Sequence(items)) => {
            for EnvEntry { key, value } in items {
                map.insert(key, value);
            }
        }
        Some(EnvVarCollection::Map(entries)) => map = entries,
        None => {}
    }
    Ok(map)
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Interpolation error: {0}")]
    Interpolation(#[from] crate::config::InterpolationError),
}
