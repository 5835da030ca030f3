//! McpClient: rmcp-backed provider session over a child process.

use std::{process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use fleet_types::{ContentItem, ToolOutput};
use rmcp::{
    RoleClient,
    model::{CallToolRequestParams, CallToolResult},
    service::{Peer, RunningService, ServiceError, ServiceExt as _},
    transport::TokioChildProcess,
};
use serde_json::{Map, Value};
use tokio::{sync::Mutex, time::timeout};
use tracing::{debug, info};

use crate::{
    config::McpServer,
    types::{McpToolMetadata, ProviderError},
};

use super::{
    session::{ProviderLauncher, ProviderSession},
    stdio::{build_stdio_command, spawn_stderr_logger},
};

/// Upper bound on process spawn plus the initialize handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// A connected provider reached through rmcp.
pub struct McpClient {
    /// Provider id, used in error messages and logs.
    name: String,
    /// Cloned request handle; calls go through it without touching `service`.
    peer: Peer<RoleClient>,
    /// Owning handle, taken on shutdown.
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
}

impl McpClient {
    /// Spawn the provider described by `server` and complete the handshake.
    pub async fn connect_stdio(name: &str, server: &McpServer) -> Result<Self, ProviderError> {
        let command = build_stdio_command(name, server)?;
        let (transport, stderr) = TokioChildProcess::builder(command)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ProviderError::connection(name, format!("failed to spawn '{}': {err}", server.command_line())))?;

        if let Some(stderr) = stderr {
            spawn_stderr_logger(name.to_string(), stderr);
        }

        let running = timeout(HANDSHAKE_TIMEOUT, ().serve(transport))
            .await
            .map_err(|_| ProviderError::connection(name, format!("handshake timed out after {HANDSHAKE_TIMEOUT:?}")))?
            .map_err(|err| ProviderError::connection(name, format!("handshake failed: {err}")))?;

        Ok(Self {
            name: name.to_string(),
            peer: running.peer().clone(),
            service: Mutex::new(Some(running)),
        })
    }
}

#[async_trait]
impl ProviderSession for McpClient {
    async fn list_tools(&self) -> Result<Vec<McpToolMetadata>, ProviderError> {
        let tools = self
            .peer
            .list_all_tools()
            .await
            .map_err(|err| ProviderError::connection(&self.name, format!("list_tools failed: {err}")))?;
        Ok(tools.into_iter().map(McpToolMetadata::from).collect())
    }

    async fn call_tool(&self, name: &str, arguments: &Map<String, Value>) -> Result<ToolOutput, ProviderError> {
        let result = self
            .peer
            .call_tool(CallToolRequestParams {
                name: name.to_string().into(),
                arguments: Some(arguments.clone()),
                task: None,
                meta: None,
            })
            .await
            .map_err(|err| match err {
                ServiceError::TransportClosed | ServiceError::TransportSend(_) => ProviderError::connection(&self.name, err.to_string()),
                other => ProviderError::invocation(name, other.to_string()),
            })?;
        convert_call_result(name, &result)
    }

    async fn shutdown(&self) {
        if let Some(running) = self.service.lock().await.take() {
            let _ = running.cancel().await;
            debug!(provider = %self.name, "provider session closed");
        }
    }
}

/// Production launcher spawning stdio child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioLauncher;

#[async_trait]
impl ProviderLauncher for StdioLauncher {
    async fn launch(&self, provider_id: &str, server: &McpServer) -> Result<Arc<dyn ProviderSession>, ProviderError> {
        info!(provider = %provider_id, command = %server.command_line(), "launching provider");
        let client = McpClient::connect_stdio(provider_id, server).await?;
        Ok(Arc::new(client))
    }
}

fn convert_call_result(tool: &str, result: &CallToolResult) -> Result<ToolOutput, ProviderError> {
    let value = serde_json::to_value(result).map_err(|err| ProviderError::invocation(tool, err.to_string()))?;
    output_from_value(tool, value)
}

/// Map a serialized call result into a [`ToolOutput`].
///
/// A result flagged `isError` becomes an invocation error carrying its text.
pub(crate) fn output_from_value(tool: &str, value: Value) -> Result<ToolOutput, ProviderError> {
    let is_error = value.get("isError").and_then(Value::as_bool).unwrap_or(false);
    let content = value
        .get("content")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(content_item).collect())
        .unwrap_or_default();
    let output = ToolOutput {
        content,
        structured: value.get("structuredContent").filter(|v| !v.is_null()).cloned(),
    };

    if is_error {
        let message = output.joined_text();
        let message = if message.is_empty() {
            "provider reported an error without details".to_string()
        } else {
            message
        };
        return Err(ProviderError::invocation(tool, message));
    }
    Ok(output)
}

fn content_item(item: &Value) -> ContentItem {
    match (item.get("type").and_then(Value::as_str), item.get("text").and_then(Value::as_str)) {
        (Some("text"), Some(text)) => ContentItem::Text { text: text.to_string() },
        _ => ContentItem::Other { value: item.clone() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_and_structured_content_are_preserved() {
        let output = output_from_value(
            "list",
            json!({
                "content": [{"type": "text", "text": "a.txt"}, {"type": "image", "data": "..", "mimeType": "image/png"}],
                "structuredContent": {"files": ["a.txt"]},
                "isError": false
            }),
        )
        .unwrap();

        assert_eq!(output.joined_text(), "a.txt");
        assert!(matches!(output.content[1], ContentItem::Other { .. }));
        assert_eq!(output.to_value(), json!({"files": ["a.txt"]}));
    }

    #[test]
    fn error_flag_becomes_invocation_error() {
        let err = output_from_value(
            "write",
            json!({"content": [{"type": "text", "text": "permission denied"}], "isError": true}),
        )
        .unwrap_err();
        assert_eq!(err, ProviderError::invocation("write", "permission denied"));
    }
}
