//! Step execution against the tool gateway.
//!
//! - `template` substitutes `{{name}}` tokens from prior step outputs
//! - `step` runs one decision with timeout, retries, and its failure strategy
//! - batches run sequentially or in bounded windows and write results back to
//!   the context in step-index order

use std::sync::Arc;

use fleet_types::{RoutingDecision, StepResult};
use futures_util::future::join_all;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    config::WorkflowSettings,
    context::WorkflowContext,
    failure::FailureHandler,
    gateway::ToolGateway,
    oracle::{StructuredVariableExtractor, VariableExtractor},
};

mod step;
pub mod template;

pub use step::StepOutcome;
pub use template::{enrich_parameters, enrich_value};

/// Executes planned steps and records their results.
pub struct StepExecutor {
    gateway: Arc<dyn ToolGateway>,
    extractor: Arc<dyn VariableExtractor>,
    failures: Arc<FailureHandler>,
    settings: WorkflowSettings,
}

impl StepExecutor {
    pub fn new(
        gateway: Arc<dyn ToolGateway>,
        extractor: Arc<dyn VariableExtractor>,
        failures: Arc<FailureHandler>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            gateway,
            extractor,
            failures,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Run the steps not yet recorded in `ctx`, one at a time in plan order.
    ///
    /// Stops after the first step whose failure strategy halts the batch.
    pub async fn run_sequential(&self, ctx: &mut WorkflowContext, tracking_id: Option<&str>) {
        let steps: Vec<RoutingDecision> = ctx.planned_steps().to_vec();
        let start = ctx.results().len();
        let delay = self.settings.inter_step_delay();

        for (index, decision) in steps.iter().enumerate().skip(start) {
            if index > start && !delay.is_zero() {
                sleep(delay).await;
            }
            let lookup = ctx.prior_step_outputs(Some(index));
            let outcome = self.run_with_policy(index, decision, &lookup, tracking_id).await;
            self.record(ctx, outcome.result).await;
            if outcome.halt {
                info!(step_index = index, "halting sequential batch after failure");
                break;
            }
        }
    }

    /// Run the remaining steps in windows of `concurrency` concurrent calls.
    ///
    /// Results of a window are recorded in step-index order once every call in
    /// the window has settled.
    pub async fn run_parallel(&self, ctx: &mut WorkflowContext, tracking_id: Option<&str>) {
        let steps: Vec<RoutingDecision> = ctx.planned_steps().to_vec();
        let start = ctx.results().len();
        let window = self.settings.concurrency.max(1);
        let pending: Vec<(usize, RoutingDecision)> = steps.into_iter().enumerate().skip(start).collect();

        for chunk in pending.chunks(window) {
            let first = chunk.first().map_or(start, |(index, _)| *index);
            let lookup = ctx.prior_step_outputs(Some(first));
            debug!(first_step = first, size = chunk.len(), "dispatching parallel window");

            let outcomes = join_all(
                chunk
                    .iter()
                    .map(|(index, decision)| self.run_with_policy(*index, decision, &lookup, tracking_id)),
            )
            .await;

            let mut halt = false;
            for outcome in outcomes {
                halt |= outcome.halt;
                self.record(ctx, outcome.result).await;
            }
            if halt {
                info!(first_step = first, "halting parallel batch after failed window");
                break;
            }
        }
    }

    /// Append a result and merge variables extracted from a successful one.
    async fn record(&self, ctx: &mut WorkflowContext, result: StepResult) {
        if result.success
            && let Some(value) = &result.result
        {
            let variables = match self.extractor.extract(&result.tool, value).await {
                Ok(variables) => variables,
                Err(err) => {
                    warn!(tool = %result.tool, error = %err, "variable extraction failed; using structured fields");
                    StructuredVariableExtractor::default().extract_sync(value)
                }
            };
            ctx.record_variables(result.step_index, variables);
        }
        ctx.append_result(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleet_mcp::ProviderError;
    use fleet_types::{ToolDescriptor, ToolKey, ToolOutput};
    use serde_json::{Map, Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    use crate::failure::FailureStrategy;

    /// Gateway scripted per tool; records every dispatched call.
    #[derive(Default)]
    struct ScriptedGateway {
        calls: Mutex<Vec<(String, Map<String, Value>)>>,
    }

    impl ScriptedGateway {
        fn calls(&self) -> Vec<(String, Map<String, Value>)> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, tool: &str) -> usize {
            self.calls().iter().filter(|(name, _)| name == tool).count()
        }
    }

    #[async_trait]
    impl ToolGateway for ScriptedGateway {
        async fn tools(&self) -> Vec<ToolDescriptor> {
            Vec::new()
        }

        async fn call(&self, full_name: &str, arguments: &Map<String, Value>, _: Option<&str>) -> Result<ToolOutput, ProviderError> {
            self.calls.lock().unwrap().push((full_name.to_string(), arguments.clone()));
            match full_name {
                "fs__fail" => Err(ProviderError::invocation(full_name, "disk on fire")),
                "fs__flaky" => Err(ProviderError::invocation(full_name, "connection reset")),
                "fs__missing" => Err(ProviderError::tool_not_found(full_name, "unknown provider")),
                "fs__hang" => {
                    sleep(Duration::from_secs(3600)).await;
                    Ok(ToolOutput::text("late"))
                }
                "fs__slow" => {
                    sleep(Duration::from_millis(50)).await;
                    Ok(ToolOutput::structured(json!({"tool": full_name})))
                }
                _ => Ok(ToolOutput::structured(json!({"tool": full_name, "args": arguments, "id": 7}))),
            }
        }
    }

    fn decision(full_name: &str) -> RoutingDecision {
        RoutingDecision::new(&ToolKey::decode(full_name).unwrap(), 0.7, "test")
    }

    fn executor(gateway: Arc<ScriptedGateway>, settings: WorkflowSettings) -> StepExecutor {
        StepExecutor::new(
            gateway,
            Arc::new(StructuredVariableExtractor::default()),
            Arc::new(FailureHandler::default()),
            settings,
        )
    }

    fn quick_settings() -> WorkflowSettings {
        WorkflowSettings {
            inter_step_delay_ms: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sequential_stops_at_first_failure() {
        let gateway = Arc::new(ScriptedGateway::default());
        let exec = executor(gateway.clone(), quick_settings());
        let mut ctx = WorkflowContext::create("req", vec![decision("fs__a"), decision("fs__fail"), decision("fs__c")]);

        exec.run_sequential(&mut ctx, None).await;

        assert_eq!(ctx.results().len(), 2);
        assert!(ctx.results()[0].success);
        assert!(!ctx.results()[1].success);
        assert_eq!(gateway.count("fs__c"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_steps_are_spaced_by_the_default_delay() {
        let gateway = Arc::new(ScriptedGateway::default());
        let exec = executor(gateway.clone(), WorkflowSettings::default());
        let mut ctx = WorkflowContext::create("req", vec![decision("fs__a"), decision("fs__b"), decision("fs__c")]);

        let started = Instant::now();
        exec.run_sequential(&mut ctx, None).await;

        assert_eq!(ctx.results().len(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    /// Gateway that tracks how many calls are in flight at once.
    #[derive(Default)]
    struct CountingGateway {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolGateway for CountingGateway {
        async fn tools(&self) -> Vec<ToolDescriptor> {
            Vec::new()
        }

        async fn call(&self, full_name: &str, _: &Map<String, Value>, _: Option<&str>) -> Result<ToolOutput, ProviderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ToolOutput::structured(json!({"tool": full_name})))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_windows_bound_calls_in_flight() {
        let gateway = Arc::new(CountingGateway::default());
        let settings = WorkflowSettings {
            concurrency: 2,
            ..WorkflowSettings::default()
        };
        let exec = StepExecutor::new(
            gateway.clone(),
            Arc::new(StructuredVariableExtractor::default()),
            Arc::new(FailureHandler::default()),
            settings,
        );
        let mut ctx = WorkflowContext::create("req", vec![decision("fs__a"), decision("fs__b"), decision("fs__c")]);

        let started = Instant::now();
        exec.run_parallel(&mut ctx, None).await;

        assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
        assert_eq!(gateway.peak.load(Ordering::SeqCst), 2);
        // Two windows of one 10ms round each, with no inter-step delay between them.
        assert_eq!(started.elapsed(), Duration::from_millis(20));
    }

    #[tokio::test]
    async fn continue_on_failure_runs_every_step() {
        let gateway = Arc::new(ScriptedGateway::default());
        let settings = WorkflowSettings {
            continue_on_failure: true,
            ..quick_settings()
        };
        let exec = executor(gateway.clone(), settings);
        let mut ctx = WorkflowContext::create("req", vec![decision("fs__a"), decision("fs__fail"), decision("fs__c")]);

        exec.run_sequential(&mut ctx, None).await;
        assert_eq!(ctx.results().len(), 3);
        assert!(ctx.results()[2].success);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_retried_then_recorded() {
        let gateway = Arc::new(ScriptedGateway::default());
        let settings = WorkflowSettings {
            step_timeout_ms: 1_000,
            retry_attempts: 2,
            ..quick_settings()
        };
        let exec = executor(gateway.clone(), settings);

        let result = exec.execute_step(0, &decision("fs__hang"), &Map::new(), None).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(result.metadata.retry_count, 2);
        assert_eq!(gateway.count("fs__hang"), 3);
    }

    #[tokio::test]
    async fn structural_errors_are_not_retried() {
        let gateway = Arc::new(ScriptedGateway::default());
        let exec = executor(gateway.clone(), quick_settings());
        let result = exec.execute_step(0, &decision("fs__missing"), &Map::new(), None).await;
        assert!(!result.success);
        assert_eq!(gateway.count("fs__missing"), 1);
        assert_eq!(result.metadata.retry_count, 0);
    }

    #[tokio::test]
    async fn parameters_are_enriched_from_prior_steps() {
        let gateway = Arc::new(ScriptedGateway::default());
        let exec = executor(gateway.clone(), quick_settings());
        let mut second = decision("fs__b");
        second.parameters.insert("id".into(), json!("{{step_0_result.id}}"));
        second.parameters.insert("label".into(), json!("item-{{id}}"));
        let mut ctx = WorkflowContext::create("req", vec![decision("fs__a"), second]);

        exec.run_sequential(&mut ctx, None).await;

        let calls = gateway.calls();
        assert_eq!(calls[1].1["id"], json!(7));
        assert_eq!(calls[1].1["label"], json!("item-7"));
        assert_eq!(ctx.get_variable("id"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn parallel_results_follow_plan_order() {
        let gateway = Arc::new(ScriptedGateway::default());
        let settings = WorkflowSettings {
            concurrency: 2,
            ..quick_settings()
        };
        let exec = executor(gateway.clone(), settings);
        let steps = vec![decision("fs__slow"), decision("fs__b"), decision("fs__c")];
        let mut ctx = WorkflowContext::create("req", steps.clone());

        exec.run_parallel(&mut ctx, None).await;

        assert_eq!(ctx.results().len(), 3);
        for (i, result) in ctx.results().iter().enumerate() {
            assert_eq!(result.step_index, i);
            assert_eq!(result.tool, steps[i].selected_tool);
        }
    }

    #[tokio::test]
    async fn parallel_stops_after_a_failed_window() {
        let gateway = Arc::new(ScriptedGateway::default());
        let settings = WorkflowSettings {
            concurrency: 2,
            ..quick_settings()
        };
        let exec = executor(gateway.clone(), settings);
        let mut ctx = WorkflowContext::create("req", vec![decision("fs__fail"), decision("fs__b"), decision("fs__c")]);

        exec.run_parallel(&mut ctx, None).await;

        assert_eq!(ctx.results().len(), 2);
        assert_eq!(gateway.count("fs__c"), 0);
    }

    #[tokio::test]
    async fn skip_strategy_marks_the_step_and_moves_on() {
        let gateway = Arc::new(ScriptedGateway::default());
        let settings = WorkflowSettings {
            failure_strategy: Some(FailureStrategy::Skip),
            ..quick_settings()
        };
        let exec = executor(gateway.clone(), settings);
        let mut ctx = WorkflowContext::create("req", vec![decision("fs__fail"), decision("fs__b")]);

        exec.run_sequential(&mut ctx, None).await;

        assert_eq!(ctx.results().len(), 2);
        assert!(ctx.results()[0].metadata.skipped);
        assert!(!ctx.has_failed());
    }

    #[tokio::test]
    async fn retry_strategy_redispatches_transient_failures_once() {
        let gateway = Arc::new(ScriptedGateway::default());
        let settings = WorkflowSettings {
            retry_attempts: 0,
            failure_strategy: Some(FailureStrategy::Retry),
            ..quick_settings()
        };
        let exec = executor(gateway.clone(), settings);

        let outcome = exec.run_with_policy(0, &decision("fs__flaky"), &Map::new(), None).await;

        assert!(outcome.halt);
        assert_eq!(gateway.count("fs__flaky"), 2);
        assert_eq!(outcome.result.metadata.retry_count, 1);
    }

    #[tokio::test]
    async fn fallback_strategy_runs_the_mapped_tool() {
        let gateway = Arc::new(ScriptedGateway::default());
        let settings = WorkflowSettings {
            failure_strategy: Some(FailureStrategy::Fallback),
            ..quick_settings()
        };
        let mut fallbacks = std::collections::HashMap::new();
        fallbacks.insert("fs__fail".to_string(), "backup__read".to_string());
        let exec = StepExecutor::new(
            gateway.clone(),
            Arc::new(StructuredVariableExtractor::default()),
            Arc::new(FailureHandler::new(fallbacks, 1)),
            settings,
        );

        let outcome = exec.run_with_policy(0, &decision("fs__fail"), &Map::new(), None).await;

        assert!(outcome.result.success);
        assert_eq!(outcome.result.tool, "backup__read");
        assert_eq!(outcome.result.metadata.fallback_from.as_deref(), Some("fs__fail"));
    }
}
