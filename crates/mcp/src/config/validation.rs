//! Registry validation, run once after interpolation.

use crate::config::{McpConfig, McpServer};
use fleet_types::{TOOL_NAME_SEPARATOR, validate_provider_id};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

static PROVIDER_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9._-]+$").expect("provider id regex should compile"));
static ENV_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").expect("env key regex should compile"));

/// Check every provider entry.
///
/// A malformed entry is disabled and keeps the problem in `err`, so
/// `initialize` reports it as skipped while the rest of the registry loads.
/// Returns the problems found, in file order.
pub fn validate_config(config: &mut McpConfig) -> Vec<ValidationError> {
    let mut problems = Vec::new();
    for (id, server) in config.mcp_servers.iter_mut() {
        let checked = validate_provider_name(id).and_then(|()| validate_launch_spec(id, server));
        match checked {
            Ok(()) => debug!(provider = %id, "provider entry is valid"),
            Err(error) => {
                warn!(provider = %id, error = %error, "disabling malformed provider entry");
                server.err = Some(error.to_string());
                server.disabled = true;
                problems.push(error);
            }
        }
    }
    problems
}

/// Provider ids prefix every namespaced tool name, so on top of the character
/// set they must keep `<provider>__<tool>` decodable.
pub fn validate_provider_name(id: &str) -> Result<(), ValidationError> {
    let problem = if id.is_empty() {
        Some("must not be empty".to_string())
    } else if !PROVIDER_ID.is_match(id) {
        Some("allowed characters are a-z, 0-9, '.', '_' and '-'".to_string())
    } else if validate_provider_id(id).is_err() {
        Some(format!("must not contain '{TOOL_NAME_SEPARATOR}' or end with '_'"))
    } else {
        None
    };
    match problem {
        Some(reason) => Err(ValidationError::InvalidProviderId { id: id.to_string(), reason }),
        None => Ok(()),
    }
}

/// A provider needs a non-blank command and well-formed env keys.
pub fn validate_launch_spec(id: &str, server: &McpServer) -> Result<(), ValidationError> {
    if server.command.as_deref().is_none_or(|command| command.trim().is_empty()) {
        return Err(ValidationError::MissingCommand { id: id.to_string() });
    }
    if let Some(key) = server
        .env
        .keys()
        .chain(server.required_env.iter())
        .find(|key| !ENV_KEY.is_match(key))
    {
        return Err(ValidationError::InvalidEnvKey {
            id: id.to_string(),
            key: key.clone(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid provider id '{id}': {reason}")]
    InvalidProviderId { id: String, reason: String },

    #[error("provider '{id}' has no command to launch")]
    MissingCommand { id: String },

    #[error("provider '{id}' uses invalid environment key '{key}' (expected UPPER_SNAKE_CASE)")]
    InvalidEnvKey { id: String, key: String },
}
