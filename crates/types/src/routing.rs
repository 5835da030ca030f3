//! Routing decisions proposed by a planner.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tool::{ToolKey, ToolNameError};

/// A proposed tool invocation. Untrusted until validated against the live catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    /// Encoded full name of the selected tool.
    pub selected_tool: String,
    /// Provider the planner believes owns the tool.
    pub provider_id: String,
    /// Planner confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
    /// Free-form explanation.
    #[serde(default)]
    pub reasoning: String,
    /// Arguments passed to the tool. String values may carry `{{name}}` templates.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl RoutingDecision {
    pub fn new(key: &ToolKey, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            selected_tool: key.encode(),
            provider_id: key.provider_id.clone(),
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Decode `selected_tool` into its composite key.
    pub fn tool_key(&self) -> Result<ToolKey, ToolNameError> {
        ToolKey::decode(&self.selected_tool)
    }
}
