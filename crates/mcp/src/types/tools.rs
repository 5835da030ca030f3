//! Metadata describing a tool exposed by a provider.
//!
//! Providers return tool descriptions via the `list_tools` RPC. This module converts the
//! `rmcp`-provided model into a serde-friendly representation and into the namespaced
//! [`ToolDescriptor`] the rest of the orchestrator works with.

use fleet_types::{ToolDescriptor, ToolKey, ToolNameError};
use rmcp::model::Tool as RmcpTool;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Captures the essential metadata for a provider tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolMetadata {
    /// Tool identifier returned by the provider.
    pub name: String,
    /// Optional human-friendly title supplied by the provider.
    pub title: Option<String>,
    /// Optional description explaining the tool's behavior.
    pub description: Option<String>,
    /// JSON schema describing the expected arguments for this tool.
    pub input_schema: Value,
}

impl McpToolMetadata {
    /// Metadata for tools defined in-process (tests, stub providers).
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: Some(description.into()),
            input_schema,
        }
    }

    /// Build metadata from the raw RMCP tool payload.
    pub fn from_rmcp(tool: &RmcpTool) -> Self {
        Self {
            name: tool.name.to_string(),
            title: tool.title.clone(),
            description: tool.description.as_ref().map(|d| d.to_string()),
            input_schema: Value::Object((tool.input_schema.as_ref()).clone()),
        }
    }

    /// Namespace this tool under `provider_id`.
    ///
    /// The published description is prefixed with the owning provider so that
    /// oracle prompts can tell same-named tools apart.
    pub fn to_descriptor(&self, provider_id: &str) -> Result<ToolDescriptor, ToolNameError> {
        let key = ToolKey::new(provider_id, self.name.clone())?;
        let text = self.description.as_deref().or(self.title.as_deref()).unwrap_or_default();
        let description = format!("[{provider_id}] {text}").trim_end().to_string();
        let schema = if self.input_schema.is_object() {
            self.input_schema.clone()
        } else {
            json!({"type": "object"})
        };
        Ok(ToolDescriptor::new(key, description, schema))
    }
}

impl From<RmcpTool> for McpToolMetadata {
    fn from(tool: RmcpTool) -> Self {
        Self::from_rmcp(&tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Tool;
    use serde_json::Map;
    use std::sync::Arc;

    #[test]
    fn from_rmcp_copies_core_fields() {
        let mut schema = Map::new();
        schema.insert("type".into(), json!("object"));

        let mut tool = Tool::new("demo", "Demo description", Arc::new(schema));
        tool.title = Some("Demo".into());

        let metadata = McpToolMetadata::from_rmcp(&tool);

        assert_eq!(metadata.name, "demo");
        assert_eq!(metadata.title.as_deref(), Some("Demo"));
        assert_eq!(metadata.description.as_deref(), Some("Demo description"));
        assert_eq!(metadata.input_schema["type"], json!("object"));
    }

    #[test]
    fn descriptor_is_namespaced_and_tagged_with_provider() {
        let metadata = McpToolMetadata::new("read_file", "Read a file from disk", json!({"type": "object"}));
        let descriptor = metadata.to_descriptor("filesystem").unwrap();

        assert_eq!(descriptor.full_name, "filesystem__read_file");
        assert_eq!(descriptor.provider_id(), "filesystem");
        assert_eq!(descriptor.description, "[filesystem] Read a file from disk");
    }

    #[test]
    fn non_object_schema_is_replaced_with_open_object() {
        let metadata = McpToolMetadata::new("ping", "", Value::Null);
        let descriptor = metadata.to_descriptor("net").unwrap();
        assert_eq!(descriptor.parameter_schema, json!({"type": "object"}));
    }
}
