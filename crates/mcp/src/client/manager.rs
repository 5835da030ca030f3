//! ConnectionManager: provider registry, lifecycle and namespaced tool calls.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use fleet_types::{ToolDescriptor, ToolKey, ToolOutput, validate_provider_id};
use jsonschema::Validator;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    config::{McpConfig, McpServer},
    types::{HealthStatus, ProviderError, ProviderStatus},
    usage::UsageTracker,
};

use super::session::{ProviderLauncher, ProviderSession};

/// Live state of one connected provider.
struct ProviderConnection {
    session: Arc<dyn ProviderSession>,
    /// Namespaced catalog captured at connect time.
    tools: Arc<Vec<ToolDescriptor>>,
    /// Compiled argument validators keyed by local tool name.
    validators: HashMap<String, Arc<Validator>>,
    /// Cleared when the channel fails mid-call; the catalog stays out of
    /// routing until the provider is restarted.
    connected: bool,
}

/// A provider left out of the registry during `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedProvider {
    pub id: String,
    pub reason: String,
}

/// Outcome of [`ConnectionManager::initialize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitializeReport {
    /// Providers connected, in configuration order.
    pub connected: Vec<String>,
    pub skipped: Vec<SkippedProvider>,
}

impl InitializeReport {
    pub fn is_empty(&self) -> bool {
        self.connected.is_empty()
    }
}

/// Owns provider processes and the namespaced tool catalog.
///
/// Connections are shared by every workflow run; calls take a read lock only
/// long enough to clone the session handle, so concurrent calls to the same
/// provider are serialized (or pipelined) by the provider channel itself.
#[derive(Clone)]
pub struct ConnectionManager {
    config: Arc<McpConfig>,
    launcher: Arc<dyn ProviderLauncher>,
    tracker: Arc<UsageTracker>,
    connections: Arc<RwLock<HashMap<String, ProviderConnection>>>,
    /// Names currently in the process of starting to avoid races.
    starting: Arc<Mutex<HashSet<String>>>,
    health: Arc<RwLock<HashMap<String, HealthStatus>>>,
}

impl ConnectionManager {
    pub fn new(config: McpConfig, tracker: Arc<UsageTracker>, launcher: Arc<dyn ProviderLauncher>) -> Self {
        Self {
            config: Arc::new(config),
            launcher,
            tracker,
            connections: Arc::new(RwLock::new(HashMap::new())),
            starting: Arc::new(Mutex::new(HashSet::new())),
            health: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &McpConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<UsageTracker> {
        &self.tracker
    }

    /// Connect every enabled provider in configuration order.
    ///
    /// A provider that is disabled, lacks required environment, or fails to
    /// launch is logged and skipped; the rest keep going.
    pub async fn initialize(&self) -> InitializeReport {
        let mut report = InitializeReport::default();
        for (id, server) in &self.config.mcp_servers {
            if server.is_disabled() {
                let reason = server.err.clone().unwrap_or_else(|| "disabled in configuration".to_string());
                debug!(provider = %id, %reason, "skipping provider");
                report.skipped.push(SkippedProvider { id: id.clone(), reason });
                continue;
            }
            match self.start_provider(id).await {
                Ok(tool_count) => {
                    info!(provider = %id, tools = tool_count, "provider connected");
                    report.connected.push(id.clone());
                }
                Err(err) => {
                    warn!(provider = %id, error = %err, "provider skipped");
                    report.skipped.push(SkippedProvider {
                        id: id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Launch a configured provider and register its catalog.
    ///
    /// Returns the number of tools it published.
    pub async fn start_provider(&self, id: &str) -> Result<usize, ProviderError> {
        let server = self
            .config
            .mcp_servers
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::connection(id, "not present in configuration"))?;
        preflight(id, &server)?;

        {
            // Checked under the reservation lock so a start that finishes
            // meanwhile is seen either as running or as still starting.
            let mut starting = self.starting.lock().await;
            if self.connections.read().await.contains_key(id) {
                return Err(ProviderError::connection(id, "already running"));
            }
            if !starting.insert(id.to_string()) {
                return Err(ProviderError::connection(id, "already starting"));
            }
        }

        // Connect outside of the registry lock
        let outcome = match self.connect(id, &server).await {
            Ok(connection) => {
                let tool_count = connection.tools.len();
                let mut health = HealthStatus::default();
                health.mark_healthy();
                self.health.write().await.insert(id.to_string(), health);
                self.connections.write().await.insert(id.to_string(), connection);
                Ok(tool_count)
            }
            Err(err) => {
                self.health.write().await.entry(id.to_string()).or_default().mark_unhealthy(err.to_string());
                Err(err)
            }
        };

        // Released only once the connection is registered.
        self.starting.lock().await.remove(id);
        outcome
    }

    async fn connect(&self, id: &str, server: &McpServer) -> Result<ProviderConnection, ProviderError> {
        let session = self.launcher.launch(id, server).await?;
        let listed = match session.list_tools().await {
            Ok(listed) => listed,
            Err(err) => {
                session.shutdown().await;
                return Err(err);
            }
        };

        let mut tools = Vec::with_capacity(listed.len());
        let mut validators = HashMap::new();
        for metadata in listed {
            let descriptor = match metadata.to_descriptor(id) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    warn!(provider = %id, tool = %metadata.name, error = %err, "dropping tool with unusable name");
                    continue;
                }
            };
            match jsonschema::options().build(&descriptor.parameter_schema) {
                Ok(validator) => {
                    validators.insert(metadata.name.clone(), Arc::new(validator));
                }
                Err(err) => {
                    warn!(tool = %descriptor.full_name, error = %err, "input schema does not compile; arguments will not be validated");
                }
            }
            tools.push(descriptor);
        }

        Ok(ProviderConnection {
            session,
            tools: Arc::new(tools),
            validators,
            connected: true,
        })
    }

    /// Close a provider's channel and drop its catalog. Unknown ids are a no-op.
    pub async fn stop_provider(&self, id: &str) {
        let removed = self.connections.write().await.remove(id);
        if let Some(connection) = removed {
            connection.session.shutdown().await;
            if let Some(health) = self.health.write().await.get_mut(id) {
                health.mark_unhealthy("Disconnected".to_string());
            }
            info!(provider = %id, "provider stopped");
        }
    }

    pub async fn restart_provider(&self, id: &str) -> Result<usize, ProviderError> {
        self.stop_provider(id).await;
        self.start_provider(id).await
    }

    pub async fn provider_status(&self, id: &str) -> ProviderStatus {
        if self.connections.read().await.get(id).is_some_and(|connection| connection.connected) {
            return ProviderStatus::Running;
        }
        if self.starting.lock().await.contains(id) {
            return ProviderStatus::Starting;
        }
        match self.health.read().await.get(id) {
            Some(health) if health.last_error.as_deref().is_some_and(|error| error != "Disconnected") => ProviderStatus::Error,
            _ => ProviderStatus::Stopped,
        }
    }

    /// Ids of connected providers, in configuration order.
    pub async fn connected_providers(&self) -> Vec<String> {
        let connections = self.connections.read().await;
        self.config
            .mcp_servers
            .keys()
            .filter(|id| connections.get(id.as_str()).is_some_and(|connection| connection.connected))
            .cloned()
            .collect()
    }

    /// Union of the catalogs of all connected providers.
    ///
    /// Names are `<provider>__<tool>`, so tools with the same local name on
    /// different providers stay distinct.
    pub async fn get_all_tools(&self) -> Vec<ToolDescriptor> {
        let connections = self.connections.read().await;
        self.config
            .mcp_servers
            .keys()
            .filter_map(|id| connections.get(id.as_str()))
            .filter(|connection| connection.connected)
            .flat_map(|connection| connection.tools.iter().cloned())
            .collect()
    }

    /// Invoke a tool by its namespaced full name.
    ///
    /// Resolution and argument validation failures are returned without
    /// reaching the provider. Every dispatched call is recorded with the usage
    /// tracker under `tracking_id` before its outcome is returned.
    pub async fn call_tool(
        &self,
        full_name: &str,
        arguments: &Map<String, Value>,
        tracking_id: Option<&str>,
    ) -> Result<ToolOutput, ProviderError> {
        let (session, key) = self.resolve(full_name, arguments).await?;

        let guard = self.tracker.track(full_name, tracking_id);
        debug!(tool = %full_name, execution = %guard.id(), "dispatching tool call");
        let result = session
            .call_tool(&key.local_name, arguments)
            .await
            .map_err(|err| err.for_tool(full_name));
        match &result {
            Ok(output) => guard.finish(true, &output.joined_text()),
            Err(err) => guard.finish(false, &err.to_string()),
        }
        if let Err(err @ ProviderError::Connection { .. }) = &result {
            self.mark_disconnected(&key.provider_id, err).await;
        }
        result
    }

    /// Take a provider whose channel failed out of the live catalog.
    async fn mark_disconnected(&self, id: &str, err: &ProviderError) {
        if let Some(connection) = self.connections.write().await.get_mut(id) {
            connection.connected = false;
        }
        self.health.write().await.entry(id.to_string()).or_default().mark_unhealthy(err.to_string());
        warn!(provider = %id, error = %err, "provider channel lost; restart it to reconnect");
    }

    async fn resolve(
        &self,
        full_name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<(Arc<dyn ProviderSession>, ToolKey), ProviderError> {
        let key = ToolKey::decode(full_name).map_err(|err| ProviderError::tool_not_found(full_name, err.to_string()))?;

        let connections = self.connections.read().await;
        let connection = match connections.get(&key.provider_id) {
            Some(connection) if connection.connected => connection,
            Some(_) => return Err(ProviderError::tool_not_found(full_name, format!("provider '{}' is not connected", key.provider_id))),
            None => return Err(ProviderError::tool_not_found(full_name, format!("unknown provider '{}'", key.provider_id))),
        };
        if !connection.tools.iter().any(|tool| tool.key == key) {
            return Err(ProviderError::tool_not_found(
                full_name,
                format!("provider '{}' does not expose '{}'", key.provider_id, key.local_name),
            ));
        }
        if let Some(validator) = connection.validators.get(&key.local_name) {
            let instance = Value::Object(arguments.clone());
            let errors: Vec<String> = validator.iter_errors(&instance).map(|err| err.to_string()).collect();
            if !errors.is_empty() {
                return Err(ProviderError::invalid_arguments(full_name, errors.join("; ")));
            }
        }
        Ok((Arc::clone(&connection.session), key))
    }

    /// Close every provider channel and clear the registry. Safe to repeat.
    pub async fn disconnect(&self) {
        let drained: Vec<(String, ProviderConnection)> = self.connections.write().await.drain().collect();
        for (id, connection) in drained {
            connection.session.shutdown().await;
            debug!(provider = %id, "provider disconnected");
        }
    }
}

/// Checks run before a provider is launched.
fn preflight(id: &str, server: &McpServer) -> Result<(), ProviderError> {
    validate_provider_id(id).map_err(|err| ProviderError::connection(id, err.to_string()))?;
    if server.is_disabled() {
        return Err(ProviderError::connection(id, "disabled in configuration"));
    }
    let missing = server.missing_required_env();
    if !missing.is_empty() {
        return Err(ProviderError::connection(
            id,
            format!("missing required environment: {}", missing.join(", ")),
        ));
    }
    Ok(())
}
