//! `${env:NAME}` interpolation for provider launch configuration.

use crate::config::{McpConfig, McpServer};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

static ENV_PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{env:([\w-]*)\}").expect("env placeholder regex should compile"));

/// Interpolate environment placeholders across every provider.
///
/// A provider whose placeholders cannot be resolved is disabled and keeps the
/// failure in `err`; the rest of the registry is unaffected.
pub fn interpolate_config(config: &mut McpConfig) -> Result<(), InterpolationError> {
    for (name, server) in config.mcp_servers.iter_mut() {
        if let Err(error) = interpolate_server(server) {
            warn!(provider = %name, error = %error, "disabling provider after interpolation failure");
            server.err = Some(error.to_string());
            server.disabled = true;
        }
        debug!(provider = %name, "interpolated provider configuration");
    }
    Ok(())
}

fn interpolate_server(server: &mut McpServer) -> Result<(), InterpolationError> {
    for value in server.env.values_mut() {
        *value = interpolate_string(value)?;
    }
    for arg in server.args.iter_mut() {
        *arg = interpolate_string(arg)?;
    }
    Ok(())
}

/// Replace every `${env:NAME}` in `value` with the variable's value.
pub(crate) fn interpolate_string(value: &str) -> Result<String, InterpolationError> {
    let mut resolved = Vec::new();
    for captures in ENV_PLACEHOLDER_REGEX.captures_iter(value) {
        let var_name = captures[1].to_string();
        let env_value = std::env::var(&var_name).map_err(|_| InterpolationError::MissingEnvVar { name: var_name.clone() })?;
        debug!("Interpolated env var: {} -> [REDACTED]", var_name);
        resolved.push((captures[0].to_string(), env_value));
    }

    let mut result = value.to_string();
    for (placeholder, env_value) in resolved {
        result = result.replace(&placeholder, &env_value);
    }
    Ok(result)
}

/// Errors that can occur during interpolation.
#[derive(Debug, Error, Clone)]
pub enum InterpolationError {
    #[error("Missing environment variable: {name}")]
    MissingEnvVar { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_env_placeholders_in_values_and_args() {
        temp_env::with_var("FLEET_TEST_ROOT", Some("/srv/data"), || {
            let mut config = McpConfig::default();
            let mut server = McpServer::stdio("fs-server", vec!["${env:FLEET_TEST_ROOT}/docs".to_string()]);
            server.env.insert("ROOT".to_string(), "${env:FLEET_TEST_ROOT}".to_string());
            config.mcp_servers.insert("filesystem".to_string(), server);

            interpolate_config(&mut config).unwrap();

            let server = &config.mcp_servers["filesystem"];
            assert_eq!(server.args, vec!["/srv/data/docs".to_string()]);
            assert_eq!(server.env["ROOT"], "/srv/data");
            assert!(!server.disabled);
        });
    }

    #[test]
    fn missing_variable_disables_only_that_provider() {
        temp_env::with_var_unset("FLEET_TEST_ABSENT", || {
            let mut config = McpConfig::default();
            let mut broken = McpServer::stdio("a", vec![]);
            broken.env.insert("TOKEN".to_string(), "${env:FLEET_TEST_ABSENT}".to_string());
            config.mcp_servers.insert("broken".to_string(), broken);
            config.mcp_servers.insert("healthy".to_string(), McpServer::stdio("b", vec![]));

            interpolate_config(&mut config).unwrap();

            assert!(config.mcp_servers["broken"].disabled);
            assert!(config.mcp_servers["broken"].err.as_deref().unwrap().contains("FLEET_TEST_ABSENT"));
            assert!(!config.mcp_servers["healthy"].disabled);
        });
    }
}
