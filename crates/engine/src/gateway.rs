//! The engine's view of the provider layer.

use async_trait::async_trait;
use fleet_mcp::{ConnectionManager, ProviderError};
use fleet_types::{ToolDescriptor, ToolOutput};
use serde_json::{Map, Value};

/// Catalog listing and tool dispatch.
///
/// [`ConnectionManager`] is the production implementation; anything else that
/// can list and call namespaced tools can drive the engine.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// Tools of every connected provider, by full name.
    async fn tools(&self) -> Vec<ToolDescriptor>;

    /// Invoke `full_name`, attributing the call to `tracking_id`.
    async fn call(&self, full_name: &str, arguments: &Map<String, Value>, tracking_id: Option<&str>) -> Result<ToolOutput, ProviderError>;
}

#[async_trait]
impl ToolGateway for ConnectionManager {
    async fn tools(&self) -> Vec<ToolDescriptor> {
        self.get_all_tools().await
    }

    async fn call(&self, full_name: &str, arguments: &Map<String, Value>, tracking_id: Option<&str>) -> Result<ToolOutput, ProviderError> {
        self.call_tool(full_name, arguments, tracking_id).await
    }
}
