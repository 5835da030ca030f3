//! Decision capabilities consumed by the engine.
//!
//! Each capability has an oracle-backed implementation ([`OracleClient`]) and
//! a deterministic one that needs no network. Callers treat every oracle error
//! as a signal to use the deterministic path.

use std::sync::Arc;

use async_trait::async_trait;
use fleet_types::{RoutingDecision, StepResult, ToolDescriptor};
use serde_json::{Map, Value};

use crate::error::OracleError;

mod keyword;
mod llm;

pub use keyword::{KeywordPlanner, StructuredVariableExtractor, SummarySynthesizer};
pub use llm::{ChatClient, HttpChatClient, OracleClient};

/// Proposes tool invocations for a request.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: &str, catalog: &[ToolDescriptor], max_decisions: usize) -> Result<Vec<RoutingDecision>, OracleError>;
}

/// Turns ordered step results into a final answer.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, request: &str, results: &[StepResult]) -> Result<String, OracleError>;
}

/// Pulls named values out of a tool result for later steps.
#[async_trait]
pub trait VariableExtractor: Send + Sync {
    async fn extract(&self, tool: &str, result: &Value) -> Result<Map<String, Value>, OracleError>;
}

/// The three capabilities bundled for the engine.
#[derive(Clone)]
pub struct Capabilities {
    pub planner: Arc<dyn Planner>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub extractor: Arc<dyn VariableExtractor>,
}

impl Capabilities {
    /// Deterministic capabilities only.
    pub fn deterministic() -> Self {
        Self {
            planner: Arc::new(KeywordPlanner::new()),
            synthesizer: Arc::new(SummarySynthesizer),
            extractor: Arc::new(StructuredVariableExtractor::default()),
        }
    }

    /// All three capabilities backed by one oracle client.
    pub fn oracle(client: Arc<OracleClient>) -> Self {
        Self {
            planner: client.clone(),
            synthesizer: client.clone(),
            extractor: client,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::deterministic()
    }
}
