//! Seams between the connection manager and the provider transport.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use fleet_types::ToolOutput;
use serde_json::{Map, Value};

use crate::{
    config::McpServer,
    types::{McpToolMetadata, ProviderError},
};

/// A live channel to one provider process.
///
/// Implementations must accept concurrent calls; the connection manager holds
/// no lock while a call is outstanding.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    /// Fetch the provider's current tool list.
    async fn list_tools(&self) -> Result<Vec<McpToolMetadata>, ProviderError>;

    /// Invoke a tool by its provider-local name.
    async fn call_tool(&self, name: &str, arguments: &Map<String, Value>) -> Result<ToolOutput, ProviderError>;

    /// Close the channel. Calling it twice is harmless.
    async fn shutdown(&self);
}

/// Starts provider processes and performs the capability handshake.
#[async_trait]
pub trait ProviderLauncher: Send + Sync {
    async fn launch(&self, provider_id: &str, server: &McpServer) -> Result<Arc<dyn ProviderSession>, ProviderError>;
}

/// Launcher serving sessions that already live in this process.
///
/// Useful for embedding providers implemented in Rust and for driving the
/// connection manager without spawning processes.
#[derive(Default, Clone)]
pub struct InProcessLauncher {
    sessions: HashMap<String, Arc<dyn ProviderSession>>,
}

impl InProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` under `provider_id`, replacing any earlier one.
    pub fn with_session(mut self, provider_id: impl Into<String>, session: Arc<dyn ProviderSession>) -> Self {
        self.sessions.insert(provider_id.into(), session);
        self
    }
}

#[async_trait]
impl ProviderLauncher for InProcessLauncher {
    async fn launch(&self, provider_id: &str, _server: &McpServer) -> Result<Arc<dyn ProviderSession>, ProviderError> {
        self.sessions
            .get(provider_id)
            .cloned()
            .ok_or_else(|| ProviderError::connection(provider_id, "no in-process session registered"))
    }
}
