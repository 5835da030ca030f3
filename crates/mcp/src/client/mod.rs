//! Provider connection subsystem.
//!
//! [`ConnectionManager`] owns provider sessions and the namespaced catalog;
//! sessions are produced by a [`ProviderLauncher`], normally the rmcp-backed
//! [`StdioLauncher`].

mod client;
mod manager;
mod session;
mod stdio;

pub use client::{McpClient, StdioLauncher};
pub use manager::{ConnectionManager, InitializeReport, SkippedProvider};
pub use session::{InProcessLauncher, ProviderLauncher, ProviderSession};
