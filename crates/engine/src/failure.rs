//! Step-level failure strategies and workflow-level recovery planning.

use std::collections::{BTreeMap, HashMap, HashSet};

use fleet_types::{FailureCause, RoutingDecision, StepFailure, ToolKey};
use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::WorkflowContext;

/// Confidence multiplier applied to substituted steps.
const FALLBACK_CONFIDENCE_FACTOR: f64 = 0.8;

/// Error texts worth retrying.
static RETRYABLE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)timeout",
        r"(?i)timed out",
        r"(?i)connection",
        r"(?i)network",
        r"(?i)temporar",
        r"(?i)rate.?limit",
        r"(?i)too many requests",
        r"ECONNRESET",
        r"ECONNREFUSED",
        r"\b5\d\d\b",
    ])
    .expect("retryable patterns should compile")
});

/// Error texts pointing at credentials or permissions.
static CONFIGURATION_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\bauth",
        r"(?i)permission",
        r"(?i)unauthori[sz]ed",
        r"(?i)forbidden",
        r"(?i)api.?key",
        r"(?i)credential",
        r"\b40[13]\b",
    ])
    .expect("configuration patterns should compile")
});

/// Built-in substitutions between tools that do the same job.
const DEFAULT_FALLBACKS: &[(&str, &str)] = &[
    ("puppeteer__puppeteer_navigate", "playwright__browser_navigate"),
    ("playwright__browser_navigate", "puppeteer__puppeteer_navigate"),
    ("puppeteer__puppeteer_screenshot", "playwright__browser_take_screenshot"),
    ("playwright__browser_take_screenshot", "puppeteer__puppeteer_screenshot"),
    ("puppeteer__puppeteer_click", "playwright__browser_click"),
    ("playwright__browser_click", "puppeteer__puppeteer_click"),
    ("brave-search__brave_web_search", "fetch__fetch"),
];

/// What to do with a step that has used up its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    Stop,
    Continue,
    Retry,
    Skip,
    Fallback,
}

/// Decision for one failed step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Record the failure and halt the batch.
    Stop,
    /// Record the failure and keep going.
    Continue,
    /// Dispatch the same step again.
    Retry,
    /// Record the step as skipped and keep going.
    Skip,
    /// Dispatch this substitute step instead.
    Fallback(RoutingDecision),
}

/// Classification of an unsuccessful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Systematic,
    Configuration,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailureAnalysis {
    pub kind: FailureKind,
    pub recoverable: bool,
    /// Indices of failed, non-skipped steps.
    pub failed_steps: Vec<usize>,
    /// Tools blamed for a systematic failure.
    pub affected_tools: Vec<String>,
    /// Provider messages of the failed steps.
    pub reasons: Vec<String>,
}

/// Instruction to re-run a failed workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPlan {
    pub kind: FailureKind,
    /// Results at or after this index are discarded before re-running.
    pub restart_from_step: usize,
    /// Rewritten plan, when tools were substituted.
    pub replacement_steps: Option<Vec<RoutingDecision>>,
}

impl RecoveryPlan {
    pub fn apply(&self, ctx: &mut WorkflowContext) {
        if let Some(steps) = &self.replacement_steps {
            ctx.replace_steps(steps.clone());
        }
        ctx.truncate_results(self.restart_from_step);
    }
}

/// Classifies failures and proposes recovery.
#[derive(Debug, Clone)]
pub struct FailureHandler {
    fallbacks: HashMap<String, String>,
    strategy_retry_limit: u32,
}

impl Default for FailureHandler {
    fn default() -> Self {
        Self::new(HashMap::new(), 1)
    }
}

impl FailureHandler {
    /// Handler with the built-in fallback map overlaid by `extra_fallbacks`.
    pub fn new(extra_fallbacks: HashMap<String, String>, strategy_retry_limit: u32) -> Self {
        let mut fallbacks: HashMap<String, String> = DEFAULT_FALLBACKS
            .iter()
            .map(|(from, to)| ((*from).to_string(), (*to).to_string()))
            .collect();
        fallbacks.extend(extra_fallbacks);
        Self {
            fallbacks,
            strategy_retry_limit,
        }
    }

    pub fn is_retryable(message: &str) -> bool {
        RETRYABLE_PATTERNS.is_match(message)
    }

    pub fn is_configuration(message: &str) -> bool {
        CONFIGURATION_PATTERNS.is_match(message)
    }

    /// Whether `failure` could clear up on its own.
    ///
    /// Timeouts and broken channels always qualify; structural failures never
    /// do; provider errors are judged by their message alone.
    pub fn is_transient(failure: &StepFailure) -> bool {
        match failure.cause {
            FailureCause::Timeout | FailureCause::Connection => true,
            FailureCause::ToolNotFound | FailureCause::InvalidArguments => false,
            FailureCause::Invocation => Self::is_retryable(&failure.detail),
        }
    }

    /// Substitute step for `decision`, if its tool has a mapped alternative.
    pub fn fallback_for(&self, decision: &RoutingDecision) -> Option<RoutingDecision> {
        let target = self.fallbacks.get(&decision.selected_tool)?;
        let key = ToolKey::decode(target).ok()?;
        Some(RoutingDecision {
            selected_tool: key.encode(),
            provider_id: key.provider_id,
            confidence: (decision.confidence * FALLBACK_CONFIDENCE_FACTOR).clamp(0.0, 1.0),
            reasoning: format!("fallback for {}: {}", decision.selected_tool, decision.reasoning),
            parameters: decision.parameters.clone(),
        })
    }

    /// Decide what happens to a step that failed with `failure`.
    ///
    /// `retries_used` counts re-dispatches already granted by the retry strategy.
    pub fn on_step_failure(
        &self,
        strategy: FailureStrategy,
        decision: &RoutingDecision,
        failure: &StepFailure,
        retries_used: u32,
        continue_on_failure: bool,
    ) -> StepAction {
        let degraded = if continue_on_failure {
            StepAction::Continue
        } else {
            StepAction::Stop
        };
        match strategy {
            FailureStrategy::Stop => StepAction::Stop,
            FailureStrategy::Continue => StepAction::Continue,
            FailureStrategy::Skip => StepAction::Skip,
            FailureStrategy::Retry => {
                if retries_used < self.strategy_retry_limit && Self::is_transient(failure) {
                    StepAction::Retry
                } else {
                    degraded
                }
            }
            FailureStrategy::Fallback => match self.fallback_for(decision) {
                Some(substitute) => StepAction::Fallback(substitute),
                None => degraded,
            },
        }
    }

    /// Classify an unsuccessful run.
    pub fn analyze(&self, ctx: &WorkflowContext) -> FailureAnalysis {
        let failed: Vec<_> = ctx
            .results()
            .iter()
            .filter(|result| !result.success && !result.metadata.skipped)
            .collect();
        let failures: Vec<&StepFailure> = failed.iter().filter_map(|result| result.failure.as_ref()).collect();
        let reasons: Vec<String> = failures.iter().map(|failure| failure.detail.clone()).collect();
        let failed_steps: Vec<usize> = failed.iter().map(|result| result.step_index).collect();

        let mut failures_by_tool: BTreeMap<&str, usize> = BTreeMap::new();
        for result in &failed {
            *failures_by_tool.entry(result.tool.as_str()).or_default() += 1;
        }
        let succeeded_tools: HashSet<&str> = ctx
            .results()
            .iter()
            .filter(|result| result.success)
            .map(|result| result.tool.as_str())
            .collect();
        let repeat_offenders: Vec<String> = failures_by_tool
            .iter()
            .filter(|(_, count)| **count >= 2)
            .map(|(tool, _)| (*tool).to_string())
            .collect();
        let others_succeeded = succeeded_tools
            .iter()
            .any(|tool| !repeat_offenders.iter().any(|bad| bad.as_str() == *tool));
        let planned_tools: HashSet<&str> = ctx.planned_steps().iter().map(|step| step.selected_tool.as_str()).collect();

        let (kind, affected_tools) = if repeat_offenders.len() == 1 && others_succeeded {
            (FailureKind::Systematic, repeat_offenders)
        } else if !failures.is_empty() && failures.iter().any(|failure| Self::is_configuration(&failure.detail)) {
            (FailureKind::Configuration, Vec::new())
        } else if !failures.is_empty() && failures.iter().all(|failure| Self::is_transient(failure)) {
            (FailureKind::Transient, Vec::new())
        } else {
            (FailureKind::Unknown, Vec::new())
        };

        let recoverable = match kind {
            FailureKind::Transient => true,
            FailureKind::Systematic => {
                let affected: HashSet<&str> = affected_tools.iter().map(String::as_str).collect();
                affected.is_subset(&planned_tools) && affected.len() < planned_tools.len()
            }
            FailureKind::Configuration | FailureKind::Unknown => false,
        };
        debug!(?kind, recoverable, failures = failed_steps.len(), "failure analysis");

        FailureAnalysis {
            kind,
            recoverable,
            failed_steps,
            affected_tools,
            reasons,
        }
    }

    /// Recovery for an analyzed failure, or `None` when nothing can be changed.
    pub fn recovery_plan(&self, ctx: &WorkflowContext, analysis: &FailureAnalysis) -> Option<RecoveryPlan> {
        if !analysis.recoverable {
            return None;
        }
        match analysis.kind {
            FailureKind::Transient => {
                let restart_from_step = analysis.failed_steps.iter().copied().min()?;
                info!(restart_from_step, "transient failure; restarting from first failed step");
                Some(RecoveryPlan {
                    kind: FailureKind::Transient,
                    restart_from_step,
                    replacement_steps: None,
                })
            }
            FailureKind::Systematic => {
                let mut substituted = false;
                let steps: Vec<RoutingDecision> = ctx
                    .planned_steps()
                    .iter()
                    .map(|step| {
                        if analysis.affected_tools.contains(&step.selected_tool)
                            && let Some(substitute) = self.fallback_for(step)
                        {
                            substituted = true;
                            return substitute;
                        }
                        step.clone()
                    })
                    .collect();
                if !substituted {
                    debug!(tools = ?analysis.affected_tools, "no fallback mapped for failing tools");
                    return None;
                }
                info!(tools = ?analysis.affected_tools, "systematic failure; substituting tools and restarting");
                Some(RecoveryPlan {
                    kind: FailureKind::Systematic,
                    restart_from_step: 0,
                    replacement_steps: Some(steps),
                })
            }
            FailureKind::Configuration | FailureKind::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_types::{StepMetadata, StepResult};
    use serde_json::json;

    fn step(full_name: &str) -> RoutingDecision {
        RoutingDecision::new(&ToolKey::decode(full_name).unwrap(), 0.9, "planned")
    }

    fn ok(index: usize, tool: &str) -> StepResult {
        StepResult::succeeded(index, tool, json!("ok"), 1, StepMetadata::default())
    }

    fn failed(index: usize, tool: &str, error: &str) -> StepResult {
        StepResult::failed(index, tool, error, 1, StepMetadata::default())
    }

    #[test]
    fn retryable_patterns_cover_transport_errors() {
        for message in ["request timeout", "timed out", "ECONNRESET", "HTTP 503 Service Unavailable", "rate limit hit"] {
            assert!(FailureHandler::is_retryable(message), "{message}");
        }
        assert!(!FailureHandler::is_retryable("file not found"));
    }

    #[test]
    fn repeated_failures_of_one_tool_are_systematic() {
        let steps = vec![
            step("puppeteer__puppeteer_navigate"),
            step("puppeteer__puppeteer_navigate"),
            step("puppeteer__puppeteer_navigate"),
            step("fs__write"),
        ];
        let mut ctx = WorkflowContext::create("req", steps);
        ctx.append_result(failed(0, "puppeteer__puppeteer_navigate", "navigation timeout"));
        ctx.append_result(failed(1, "puppeteer__puppeteer_navigate", "navigation timeout"));
        ctx.append_result(failed(2, "puppeteer__puppeteer_navigate", "navigation timeout"));
        ctx.append_result(ok(3, "fs__write"));

        let handler = FailureHandler::default();
        let analysis = handler.analyze(&ctx);
        assert_eq!(analysis.kind, FailureKind::Systematic);
        assert!(analysis.recoverable);

        let plan = handler.recovery_plan(&ctx, &analysis).unwrap();
        assert_eq!(plan.restart_from_step, 0);
        let steps = plan.replacement_steps.clone().unwrap();
        assert_eq!(steps[0].selected_tool, "playwright__browser_navigate");
        assert_eq!(steps[0].provider_id, "playwright");
        assert!(steps[0].confidence < 0.9);
        assert_eq!(steps[3].selected_tool, "fs__write");

        plan.apply(&mut ctx);
        assert!(ctx.results().is_empty());
        assert_eq!(ctx.planned_steps()[0].selected_tool, "playwright__browser_navigate");
    }

    #[test]
    fn transient_failure_restarts_from_first_failed_step() {
        let names = ["fs__a", "fs__b", "fs__c", "fs__d", "fs__e"];
        let mut ctx = WorkflowContext::create("req", names.iter().map(|n| step(n)).collect());
        ctx.append_result(ok(0, "fs__a"));
        ctx.append_result(ok(1, "fs__b"));
        ctx.append_result(failed(2, "fs__c", "connection reset by peer"));

        let handler = FailureHandler::default();
        let analysis = handler.analyze(&ctx);
        assert_eq!(analysis.kind, FailureKind::Transient);

        let plan = handler.recovery_plan(&ctx, &analysis).unwrap();
        assert_eq!(plan.restart_from_step, 2);
        plan.apply(&mut ctx);
        assert_eq!(ctx.results().len(), 2);
    }

    #[test]
    fn tool_names_never_decide_the_classification() {
        let tool = "playwright__browser_network_requests";
        let mut ctx = WorkflowContext::create("req", vec![step(tool)]);
        ctx.append_result(
            StepResult::failed(0, tool, format!("Tool invocation error: {tool} - no page is open"), 1, StepMetadata::default())
                .with_failure(StepFailure::new(FailureCause::Invocation, "no page is open")),
        );

        let handler = FailureHandler::default();
        let analysis = handler.analyze(&ctx);
        assert_eq!(analysis.kind, FailureKind::Unknown);
        assert!(!analysis.recoverable);
        assert_eq!(analysis.reasons, vec!["no page is open"]);
        assert!(handler.recovery_plan(&ctx, &analysis).is_none());
    }

    #[test]
    fn timeouts_are_transient_whatever_the_message() {
        let mut ctx = WorkflowContext::create("req", vec![step("fs__read")]);
        ctx.append_result(
            StepResult::failed(0, "fs__read", "Execution timeout", 1, StepMetadata::default())
                .with_failure(StepFailure::new(FailureCause::Timeout, "no answer")),
        );
        assert_eq!(FailureHandler::default().analyze(&ctx).kind, FailureKind::Transient);

        let missing = StepFailure::new(FailureCause::ToolNotFound, "connection to provider 'fs' was never made");
        assert!(!FailureHandler::is_transient(&missing));
    }

    #[test]
    fn auth_errors_are_configuration_and_not_recoverable() {
        let mut ctx = WorkflowContext::create("req", vec![step("gh__create_issue")]);
        ctx.append_result(failed(0, "gh__create_issue", "401 Unauthorized: bad token"));

        let handler = FailureHandler::default();
        let analysis = handler.analyze(&ctx);
        assert_eq!(analysis.kind, FailureKind::Configuration);
        assert!(handler.recovery_plan(&ctx, &analysis).is_none());
    }

    #[test]
    fn total_failure_of_a_single_tool_is_not_recoverable() {
        let mut ctx = WorkflowContext::create("req", vec![step("fs__read"), step("fs__read")]);
        ctx.append_result(failed(0, "fs__read", "no such file"));
        ctx.append_result(failed(1, "fs__read", "no such file"));
        let analysis = FailureHandler::default().analyze(&ctx);
        assert_eq!(analysis.kind, FailureKind::Unknown);
        assert!(!analysis.recoverable);
    }

    #[test]
    fn retry_strategy_degrades_for_permanent_errors() {
        let handler = FailureHandler::default();
        let decision = step("fs__read");
        let timeout = StepFailure::new(FailureCause::Timeout, "timed out after 10ms");
        let missing = StepFailure::new(FailureCause::Invocation, "no such file");
        assert_eq!(
            handler.on_step_failure(FailureStrategy::Retry, &decision, &timeout, 0, false),
            StepAction::Retry
        );
        assert_eq!(
            handler.on_step_failure(FailureStrategy::Retry, &decision, &timeout, 1, false),
            StepAction::Stop
        );
        assert_eq!(
            handler.on_step_failure(FailureStrategy::Retry, &decision, &missing, 0, true),
            StepAction::Continue
        );

        let network_tool = step("playwright__browser_network_requests");
        assert_eq!(
            handler.on_step_failure(FailureStrategy::Retry, &network_tool, &StepFailure::new(FailureCause::Invocation, "no page is open"), 0, false),
            StepAction::Stop
        );
    }

    #[test]
    fn fallback_strategy_uses_configured_map() {
        let mut extra = HashMap::new();
        extra.insert("fs__read".to_string(), "backup__read".to_string());
        let handler = FailureHandler::new(extra, 1);

        let boom = StepFailure::new(FailureCause::Invocation, "boom");
        let action = handler.on_step_failure(FailureStrategy::Fallback, &step("fs__read"), &boom, 0, false);
        let StepAction::Fallback(substitute) = action else {
            panic!("expected fallback, got {action:?}");
        };
        assert_eq!(substitute.selected_tool, "backup__read");
        assert_eq!(substitute.provider_id, "backup");

        assert_eq!(
            handler.on_step_failure(FailureStrategy::Fallback, &step("fs__write"), &boom, 0, false),
            StepAction::Stop
        );
    }
}
