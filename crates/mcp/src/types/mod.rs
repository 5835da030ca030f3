//! Core types for provider connection management.

pub mod errors;
pub mod status;
pub mod tools;

pub use errors::ProviderError;
pub use status::{HealthStatus, ProviderStatus};
pub use tools::McpToolMetadata;
