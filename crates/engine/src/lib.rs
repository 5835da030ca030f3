//! # Fleet Engine
//!
//! The Fleet engine turns a natural-language request into a plan of tool
//! calls, executes the plan against the connected providers, recovers from
//! failed runs, and synthesizes a final answer.
//!
//! ## Architecture
//!
//! - **`catalog`**: global tool catalog with derived tags, and the router that
//!   obtains and validates plans
//! - **`context`**: mutable state of one in-flight run
//! - **`executor`**: single-step execution (templating, timeout, retries) and
//!   sequential or bounded-parallel batches
//! - **`failure`**: per-step failure strategies, run classification and recovery plans
//! - **`engine`**: the coordinator tying the pieces together
//! - **`oracle`**: planner, synthesizer and variable-extractor capabilities,
//!   oracle-backed or deterministic
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use fleet_engine::{Capabilities, EngineConfig, WorkflowEngine};
//! use fleet_mcp::{ConnectionManager, McpConfig, StdioLauncher, UsageTracker};
//!
//! # async fn demo() {
//! let tracker = Arc::new(UsageTracker::new());
//! let manager = ConnectionManager::new(McpConfig::default(), tracker.clone(), Arc::new(StdioLauncher));
//! manager.initialize().await;
//!
//! let engine = WorkflowEngine::new(Arc::new(manager), tracker, Capabilities::deterministic(), &EngineConfig::default());
//! let result = engine.run("list the files here", None).await;
//! println!("{}", result.message);
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod failure;
pub mod gateway;
pub mod oracle;

pub use catalog::{Router, build_catalog, derive_tags};
pub use config::{EngineConfig, OracleSettings, WorkflowSettings, default_engine_config_path, load_engine_config, load_engine_config_from_path};
pub use context::WorkflowContext;
pub use engine::WorkflowEngine;
pub use error::{OracleError, RoutingError, WorkflowError};
pub use executor::{StepExecutor, StepOutcome};
pub use failure::{FailureAnalysis, FailureHandler, FailureKind, FailureStrategy, RecoveryPlan, StepAction};
pub use gateway::ToolGateway;
pub use oracle::{Capabilities, OracleClient, Planner, Synthesizer, VariableExtractor};
