//! Error types for provider connections and tool calls.

use fleet_types::{FailureCause, StepFailure};
use thiserror::Error;

/// Errors raised by the connection manager and provider sessions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider could not be launched or failed its handshake.
    #[error("Connection error: {provider} - {reason}")]
    Connection { provider: String, reason: String },

    /// The full name does not resolve to a connected provider's tool.
    #[error("Tool not found: {name} - {reason}")]
    ToolNotFound { name: String, reason: String },

    /// Arguments do not satisfy the tool's declared input schema.
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The provider answered the call with an error.
    #[error("Tool invocation error: {tool} - {message}")]
    Invocation { tool: String, message: String },

    /// The call did not complete within its time budget.
    #[error("Execution timeout: {tool} timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },
}

impl ProviderError {
    pub fn connection(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn tool_not_found(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolNotFound {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_arguments(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn invocation(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invocation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn timeout(tool: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            tool: tool.into(),
            timeout_ms,
        }
    }

    /// Re-label the error with the caller-facing tool name.
    ///
    /// Sessions report provider-local names; the connection manager rewrites
    /// them to the namespaced full name before the error leaves the crate.
    pub fn for_tool(self, full_name: &str) -> Self {
        match self {
            Self::ToolNotFound { reason, .. } => Self::tool_not_found(full_name, reason),
            Self::InvalidArguments { reason, .. } => Self::invalid_arguments(full_name, reason),
            Self::Invocation { message, .. } => Self::invocation(full_name, message),
            Self::Timeout { timeout_ms, .. } => Self::timeout(full_name, timeout_ms),
            connection @ Self::Connection { .. } => connection,
        }
    }

    pub fn cause(&self) -> FailureCause {
        match self {
            Self::Connection { .. } => FailureCause::Connection,
            Self::ToolNotFound { .. } => FailureCause::ToolNotFound,
            Self::InvalidArguments { .. } => FailureCause::InvalidArguments,
            Self::Invocation { .. } => FailureCause::Invocation,
            Self::Timeout { .. } => FailureCause::Timeout,
        }
    }

    /// The underlying message, without the provider or tool name.
    pub fn detail(&self) -> String {
        match self {
            Self::Connection { reason, .. } | Self::ToolNotFound { reason, .. } | Self::InvalidArguments { reason, .. } => reason.clone(),
            Self::Invocation { message, .. } => message.clone(),
            Self::Timeout { timeout_ms, .. } => format!("timed out after {timeout_ms}ms"),
        }
    }

    pub fn to_step_failure(&self) -> StepFailure {
        StepFailure::new(self.cause(), self.detail())
    }

    /// Whether another attempt could produce a different outcome.
    ///
    /// Unknown tools and schema-invalid arguments fail identically every time.
    pub fn is_retryable_kind(&self) -> bool {
        !matches!(self, Self::ToolNotFound { .. } | Self::InvalidArguments { .. })
    }
}
