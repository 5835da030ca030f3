//! Top-level coordinator: plan, execute, recover, synthesize.

use std::sync::Arc;

use fleet_mcp::UsageTracker;
use fleet_types::{StepResult, WorkflowMetadata, WorkflowResult, WorkflowStatus};
use tracing::{info, warn};

use crate::{
    catalog::Router,
    config::{EngineConfig, WorkflowSettings},
    context::WorkflowContext,
    error::WorkflowError,
    executor::StepExecutor,
    failure::FailureHandler,
    gateway::ToolGateway,
    oracle::{Capabilities, SummarySynthesizer, Synthesizer},
};

/// Runs natural-language requests against the connected tool providers.
///
/// One engine can serve concurrent runs; each run owns its own
/// [`WorkflowContext`].
pub struct WorkflowEngine {
    gateway: Arc<dyn ToolGateway>,
    tracker: Arc<UsageTracker>,
    router: Router,
    executor: StepExecutor,
    failures: Arc<FailureHandler>,
    synthesizer: Arc<dyn Synthesizer>,
    settings: WorkflowSettings,
}

impl WorkflowEngine {
    pub fn new(gateway: Arc<dyn ToolGateway>, tracker: Arc<UsageTracker>, capabilities: Capabilities, config: &EngineConfig) -> Self {
        let settings = config.workflow.clone();
        let failures = Arc::new(FailureHandler::new(config.fallbacks.clone(), settings.strategy_retry_limit));
        let executor = StepExecutor::new(gateway.clone(), capabilities.extractor, failures.clone(), settings.clone());
        Self {
            gateway,
            tracker,
            router: Router::new(capabilities.planner, settings.max_decisions),
            executor,
            failures,
            synthesizer: capabilities.synthesizer,
            settings,
        }
    }

    pub fn tracker(&self) -> &Arc<UsageTracker> {
        &self.tracker
    }

    /// Execute `request` end to end.
    ///
    /// `parallel` overrides the configured execution mode. Every outcome,
    /// including routing failures, is reported as a [`WorkflowResult`].
    pub async fn run(&self, request: &str, parallel: Option<bool>) -> WorkflowResult {
        let session_id = self.tracker.start_session(request);
        info!(session = %session_id, request, "workflow started");

        let result = self.run_session(request, parallel.unwrap_or(self.settings.parallel), &session_id).await;

        self.tracker.end_session(&session_id, result.success, &result.message);
        info!(
            session = %session_id,
            success = result.success,
            steps = result.metadata.steps,
            recovery_attempts = result.metadata.recovery_attempts,
            "workflow finished"
        );
        result
    }

    async fn run_session(&self, request: &str, parallel: bool, session_id: &str) -> WorkflowResult {
        let steps = match self.router.plan(request, self.gateway.as_ref()).await {
            Ok(steps) => steps,
            Err(err) => {
                warn!(error = %err, "routing failed");
                let mut ctx = WorkflowContext::create(request, Vec::new());
                ctx.set_status(WorkflowStatus::Failed);
                return finish(&ctx, false, WorkflowError::from(err).to_string(), 0);
            }
        };

        let mut ctx = WorkflowContext::create(request, steps);
        ctx.set_status(WorkflowStatus::Running);
        self.execute(&mut ctx, parallel, session_id).await;

        let mut recovery_attempts = 0;
        while !succeeded(&ctx) && recovery_attempts < self.settings.max_recovery_attempts {
            let analysis = self.failures.analyze(&ctx);
            let Some(plan) = self.failures.recovery_plan(&ctx, &analysis) else {
                info!(kind = ?analysis.kind, "no recovery plan; giving up");
                break;
            };
            recovery_attempts += 1;
            info!(attempt = recovery_attempts, kind = ?plan.kind, restart_from = plan.restart_from_step, "applying recovery plan");
            plan.apply(&mut ctx);
            self.execute(&mut ctx, parallel, session_id).await;
        }

        if succeeded(&ctx) {
            ctx.set_status(WorkflowStatus::Completed);
            let message = match self.synthesizer.synthesize(ctx.original_request(), ctx.results()).await {
                Ok(message) => message,
                Err(err) => {
                    warn!(error = %err, "synthesis failed; using summary");
                    SummarySynthesizer::summarize(ctx.original_request(), ctx.results())
                }
            };
            finish(&ctx, true, message, recovery_attempts)
        } else {
            ctx.set_status(WorkflowStatus::Failed);
            let message = failure_message(&ctx, recovery_attempts);
            finish(&ctx, false, message, recovery_attempts)
        }
    }

    async fn execute(&self, ctx: &mut WorkflowContext, parallel: bool, session_id: &str) {
        if parallel {
            self.executor.run_parallel(ctx, Some(session_id)).await;
        } else {
            self.executor.run_sequential(ctx, Some(session_id)).await;
        }
    }
}

/// Every planned step produced a result and none failed.
fn succeeded(ctx: &WorkflowContext) -> bool {
    ctx.is_complete() && !ctx.has_failed()
}

fn failure_message(ctx: &WorkflowContext, recovery_attempts: u32) -> String {
    let summary = ctx.summarize();
    let reasons: Vec<String> = ctx
        .results()
        .iter()
        .filter(|result| !result.success && !result.metadata.skipped)
        .map(|result| format!("step {} ({}): {}", result.step_index, result.tool, result.error.as_deref().unwrap_or("unknown error")))
        .collect();
    let reason = if reasons.is_empty() {
        "not every planned step ran".to_string()
    } else {
        reasons.join("; ")
    };
    let headline = WorkflowError::Exhausted {
        attempts: recovery_attempts,
        reason,
    };
    format!(
        "{headline}\n{} of {} step(s) executed, {} succeeded, {} failed.",
        summary.executed_steps, summary.total_steps, summary.successes, summary.failures
    )
}

fn finish(ctx: &WorkflowContext, success: bool, message: String, recovery_attempts: u32) -> WorkflowResult {
    let summary = ctx.summarize();
    WorkflowResult {
        success,
        message,
        tools_used: tools_used(ctx.results()),
        results: ctx.results().to_vec(),
        metadata: WorkflowMetadata {
            steps: summary.total_steps,
            successes: summary.successes,
            failures: summary.failures,
            elapsed_ms: summary.elapsed_ms,
            recovery_attempts,
            status: ctx.status(),
        },
    }
}

/// Distinct tools in first-use order.
fn tools_used(results: &[StepResult]) -> Vec<String> {
    let mut tools: Vec<String> = Vec::new();
    for result in results {
        if !tools.contains(&result.tool) {
            tools.push(result.tool.clone());
        }
    }
    tools
}
