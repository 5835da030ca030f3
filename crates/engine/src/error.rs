//! Error types raised by routing, the oracle, and workflow runs.

use thiserror::Error;

/// Planning could not produce a runnable plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// No connected provider publishes any tool.
    #[error("no tools available: no connected provider publishes a tool")]
    EmptyCatalog,

    /// Every proposed decision referred to a tool outside the live catalog.
    #[error("no valid routing decisions for request: {request}")]
    NoValidDecisions { request: String },
}

/// Failures talking to the decision oracle. Always handled at the call site.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("http error: {0}")]
    Http(String),
    #[error("response error: {0}")]
    Response(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Reasons a workflow ended without success, rendered into the failure message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("workflow failed after {attempts} recovery attempt(s): {reason}")]
    Exhausted { attempts: u32, reason: String },
}
