//! Engine settings loaded from `engine.json`.
//!
//! Every field is optional; a missing file yields the defaults below.

use std::{collections::HashMap, env, fs, path::Path, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use dirs_next::config_dir;
use serde::{Deserialize, Serialize};

use crate::failure::FailureStrategy;

/// Environment variable overriding the engine settings location.
const CONFIG_PATH_ENV: &str = "FLEET_ENGINE_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub workflow: WorkflowSettings,
    /// Decision oracle endpoint; `None` disables it.
    pub oracle: Option<OracleSettings>,
    /// Extra tool substitutions (`fullName` to `fullName`) merged over the built-in map.
    pub fallbacks: HashMap<String, String>,
}

/// Execution knobs for a single workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowSettings {
    pub step_timeout_ms: u64,
    /// Extra attempts after the first for a failing step.
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub inter_step_delay_ms: u64,
    /// Window size for parallel execution.
    pub concurrency: usize,
    pub continue_on_failure: bool,
    pub max_recovery_attempts: u32,
    /// Upper bound on decisions requested from the planner.
    pub max_decisions: usize,
    pub parallel: bool,
    /// Strategy applied once a step has exhausted its attempts.
    /// Unset means `continue` when `continueOnFailure` is set, `stop` otherwise.
    pub failure_strategy: Option<FailureStrategy>,
    /// Re-dispatches granted by the `retry` strategy per step.
    pub strategy_retry_limit: u32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            step_timeout_ms: 30_000,
            retry_attempts: 2,
            retry_delay_ms: 0,
            inter_step_delay_ms: 100,
            concurrency: 3,
            continue_on_failure: false,
            max_recovery_attempts: 2,
            max_decisions: 5,
            parallel: false,
            failure_strategy: None,
            strategy_retry_limit: 1,
        }
    }
}

impl WorkflowSettings {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn inter_step_delay(&self) -> Duration {
        Duration::from_millis(self.inter_step_delay_ms)
    }

    /// Effective per-step failure strategy.
    pub fn step_strategy(&self) -> FailureStrategy {
        self.failure_strategy.unwrap_or(if self.continue_on_failure {
            FailureStrategy::Continue
        } else {
            FailureStrategy::Stop
        })
    }
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OracleSettings {
    /// Base URL up to and including the API version, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the bearer token.
    pub api_key_env: Option<String>,
    pub temperature: f32,
    pub timeout_ms: u64,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            temperature: 0.1,
            timeout_ms: 30_000,
        }
    }
}

impl OracleSettings {
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| env::var(name).ok())
            .filter(|value| !value.trim().is_empty())
    }
}

/// Returns the default path for `engine.json`.
pub fn default_engine_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }
    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("fleet").join("engine.json")
}

/// Loads engine settings from the default path.
pub fn load_engine_config() -> Result<EngineConfig> {
    load_engine_config_from_path(&default_engine_config_path())
}

/// Loads engine settings from `path`; a missing file yields defaults.
pub fn load_engine_config_from_path(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let content = fs::read_to_string(path).with_context(|| format!("failed to read engine config {}", path.display()))?;
    let config: EngineConfig =
        serde_json::from_str(&content).with_context(|| format!("failed to parse engine config {}", path.display()))?;
    Ok(config)
}
