//! Tool provider infrastructure for Fleet.
//!
//! This crate launches provider processes described in `mcp.json`, publishes
//! their tools under namespaced names, dispatches calls to them and keeps an
//! in-memory usage log of sessions and executions.

pub mod client;
pub mod config;
pub mod types;
pub mod usage;

pub use client::{ConnectionManager, InProcessLauncher, InitializeReport, ProviderLauncher, ProviderSession, StdioLauncher};
pub use config::{ConfigError, McpConfig, McpServer};
pub use types::{McpToolMetadata, ProviderError, ProviderStatus};
pub use usage::{UsageStats, UsageTracker};
