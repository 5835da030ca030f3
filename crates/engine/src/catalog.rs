//! Global tool catalog and request routing.

use std::sync::Arc;

use fleet_types::{RoutingDecision, ToolDescriptor};
use tracing::{debug, info, warn};

use crate::{
    error::RoutingError,
    gateway::ToolGateway,
    oracle::{KeywordPlanner, Planner},
};

/// Capability tags implied by well-known provider ids, matched by substring.
const PROVIDER_CAPABILITIES: &[(&str, &[&str])] = &[
    ("filesystem", &["filesystem", "file"]),
    ("fs", &["filesystem", "file"]),
    ("github", &["vcs", "repository", "code"]),
    ("gitlab", &["vcs", "repository", "code"]),
    ("git", &["vcs", "repository"]),
    ("playwright", &["browser", "web", "automation"]),
    ("puppeteer", &["browser", "web", "automation"]),
    ("brave-search", &["web", "search"]),
    ("fetch", &["web", "http"]),
    ("sqlite", &["database", "sql"]),
    ("postgres", &["database", "sql"]),
    ("memory", &["memory", "knowledge"]),
    ("slack", &["messaging", "chat"]),
];

/// Action tags and the words that imply them.
pub(crate) const ACTION_KEYWORDS: &[(&str, &[&str])] = &[
    ("read", &["read", "get", "view", "open", "cat", "show"]),
    ("write", &["write", "edit", "update", "save", "put", "modify", "append"]),
    ("search", &["search", "find", "query", "grep", "lookup"]),
    ("list", &["list", "ls", "enumerate", "tree"]),
    ("create", &["create", "new", "add", "make", "mkdir", "insert"]),
    ("delete", &["delete", "remove", "rm", "unlink", "drop", "destroy"]),
];

/// Lowercase word tokens with a light plural strip (`files` becomes `file`).
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let word = word.to_ascii_lowercase();
            if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
                word[..word.len() - 1].to_string()
            } else {
                word
            }
        })
        .collect()
}

/// Action tags implied by `tokens`.
pub(crate) fn action_tags<'a>(tokens: impl IntoIterator<Item = &'a String>) -> Vec<&'static str> {
    let mut tags = Vec::new();
    for token in tokens {
        for (tag, words) in ACTION_KEYWORDS {
            if words.contains(&token.as_str()) && !tags.contains(tag) {
                tags.push(*tag);
            }
        }
    }
    tags
}

/// Capability and action tags for one tool.
pub fn derive_tags(tool: &ToolDescriptor) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let provider = tool.provider_id().to_ascii_lowercase();
    for (needle, capabilities) in PROVIDER_CAPABILITIES {
        if provider.contains(needle) {
            for capability in *capabilities {
                if !tags.iter().any(|tag| tag == capability) {
                    tags.push((*capability).to_string());
                }
            }
        }
    }

    let mut tokens = tokenize(tool.local_name());
    tokens.extend(tokenize(&tool.description));
    for tag in action_tags(&tokens) {
        if !tags.iter().any(|existing| existing == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

/// Attach derived tags to every tool.
pub fn build_catalog(tools: Vec<ToolDescriptor>) -> Vec<ToolDescriptor> {
    tools
        .into_iter()
        .map(|mut tool| {
            tool.derived_tags = derive_tags(&tool);
            tool
        })
        .collect()
}

/// Obtains and validates plans for requests.
pub struct Router {
    planner: Arc<dyn Planner>,
    fallback: KeywordPlanner,
    max_decisions: usize,
}

impl Router {
    pub fn new(planner: Arc<dyn Planner>, max_decisions: usize) -> Self {
        Self {
            planner,
            fallback: KeywordPlanner::new(),
            max_decisions: max_decisions.max(1),
        }
    }

    /// Ask the planner for up to `max_decisions` decisions.
    ///
    /// Planner errors are replaced by the keyword planner's answer.
    pub async fn route(&self, request: &str, catalog: &[ToolDescriptor]) -> Result<Vec<RoutingDecision>, RoutingError> {
        if catalog.is_empty() {
            return Err(RoutingError::EmptyCatalog);
        }
        let mut decisions = match self.planner.plan(request, catalog, self.max_decisions).await {
            Ok(decisions) => decisions,
            Err(err) => {
                warn!(error = %err, "planner failed; using keyword routing");
                self.fallback.plan_sync(request, catalog)
            }
        };
        decisions.truncate(self.max_decisions);
        debug!(count = decisions.len(), "routing decisions proposed");
        Ok(decisions)
    }

    /// Keep only decisions naming a tool of the live catalog under its owning provider.
    pub fn validate(&self, decisions: Vec<RoutingDecision>, catalog: &[ToolDescriptor]) -> Vec<RoutingDecision> {
        decisions
            .into_iter()
            .filter_map(|mut decision| {
                let known = catalog
                    .iter()
                    .any(|tool| tool.full_name == decision.selected_tool && tool.provider_id() == decision.provider_id);
                if !known {
                    warn!(
                        tool = %decision.selected_tool,
                        provider = %decision.provider_id,
                        "dropping decision for a tool outside the live catalog"
                    );
                    return None;
                }
                decision.confidence = if decision.confidence.is_finite() {
                    decision.confidence.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                Some(decision)
            })
            .collect()
    }

    /// Route against the gateway's catalog and validate; an empty result is a
    /// routing failure.
    ///
    /// Validation re-reads the catalog after the planner answers, so tools of
    /// providers that went away meanwhile are dropped here instead of failing
    /// at dispatch.
    pub async fn plan(&self, request: &str, gateway: &dyn ToolGateway) -> Result<Vec<RoutingDecision>, RoutingError> {
        let catalog = build_catalog(gateway.tools().await);
        let proposed = self.route(request, &catalog).await?;
        let live = gateway.tools().await;
        let valid = self.validate(proposed, &live);
        if valid.is_empty() {
            return Err(RoutingError::NoValidDecisions {
                request: request.to_string(),
            });
        }
        info!(steps = valid.len(), "plan ready");
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use async_trait::async_trait;
    use fleet_mcp::ProviderError;
    use fleet_types::{ToolKey, ToolOutput};
    use serde_json::{Map, Value, json};
    use std::sync::Mutex;

    fn tool(provider: &str, name: &str, description: &str) -> ToolDescriptor {
        ToolDescriptor::new(ToolKey::new(provider, name).unwrap(), description, json!({"type": "object"}))
    }

    struct FixedPlanner(Result<Vec<RoutingDecision>, OracleError>);

    #[async_trait]
    impl Planner for FixedPlanner {
        async fn plan(&self, _: &str, _: &[ToolDescriptor], _: usize) -> Result<Vec<RoutingDecision>, OracleError> {
            self.0.clone()
        }
    }

    /// Gateway serving a queue of catalogs, one per `tools` call; the last repeats.
    struct ShiftingGateway(Mutex<Vec<Vec<ToolDescriptor>>>);

    impl ShiftingGateway {
        fn new(catalogs: Vec<Vec<ToolDescriptor>>) -> Self {
            Self(Mutex::new(catalogs))
        }

        fn fixed(catalog: Vec<ToolDescriptor>) -> Self {
            Self::new(vec![catalog])
        }
    }

    #[async_trait]
    impl ToolGateway for ShiftingGateway {
        async fn tools(&self) -> Vec<ToolDescriptor> {
            let mut catalogs = self.0.lock().unwrap();
            if catalogs.len() > 1 { catalogs.remove(0) } else { catalogs[0].clone() }
        }

        async fn call(&self, full_name: &str, _: &Map<String, Value>, _: Option<&str>) -> Result<ToolOutput, ProviderError> {
            Err(ProviderError::tool_not_found(full_name, "routing tests never dispatch"))
        }
    }

    fn decision(full_name: &str, provider: &str) -> RoutingDecision {
        RoutingDecision {
            selected_tool: full_name.into(),
            provider_id: provider.into(),
            confidence: 0.9,
            reasoning: String::new(),
            parameters: Default::default(),
        }
    }

    #[test]
    fn tags_combine_provider_capabilities_and_actions() {
        let tags = derive_tags(&tool("filesystem", "list_directory", "List directory contents"));
        assert_eq!(tags, vec!["filesystem", "file", "list"]);

        let tags = derive_tags(&tool("puppeteer", "navigate", "Open a page and read the title"));
        assert!(tags.contains(&"browser".to_string()));
        assert!(tags.contains(&"read".to_string()));
    }

    #[test]
    fn tokenizer_strips_plurals_and_separators() {
        assert_eq!(tokenize("List the_files, here!"), vec!["list", "the", "file", "here"]);
        assert_eq!(tokenize("access"), vec!["access"]);
    }

    #[tokio::test]
    async fn empty_catalog_is_refused() {
        let router = Router::new(Arc::new(FixedPlanner(Ok(Vec::new()))), 5);
        let gateway = ShiftingGateway::fixed(Vec::new());
        assert_eq!(router.plan("anything", &gateway).await, Err(RoutingError::EmptyCatalog));
    }

    #[tokio::test]
    async fn validate_keeps_only_live_pairs() {
        let catalog = build_catalog(vec![tool("fs", "read", "Read a file"), tool("web", "fetch", "Fetch a URL")]);
        let router = Router::new(Arc::new(KeywordPlanner::new()), 5);
        let proposed = vec![
            decision("fs__read", "fs"),
            decision("fs__read", "web"),
            decision("fs__invented", "fs"),
            decision("web__fetch", "web"),
        ];

        let valid = router.validate(proposed.clone(), &catalog);
        assert_eq!(valid.len(), 2);
        for kept in &valid {
            assert!(proposed.contains(kept));
            assert!(catalog.iter().any(|t| t.full_name == kept.selected_tool && t.provider_id() == kept.provider_id));
        }
    }

    #[tokio::test]
    async fn planner_errors_fall_back_to_keywords() {
        let gateway = ShiftingGateway::fixed(vec![tool("fs", "list_directory", "List directory contents")]);
        let router = Router::new(Arc::new(FixedPlanner(Err(OracleError::Http("down".into())))), 5);
        let plan = router.plan("list the files", &gateway).await.unwrap();
        assert_eq!(plan[0].selected_tool, "fs__list_directory");
    }

    #[tokio::test]
    async fn hallucinated_plans_are_a_routing_failure() {
        let gateway = ShiftingGateway::fixed(vec![tool("fs", "read", "Read a file")]);
        let router = Router::new(Arc::new(FixedPlanner(Ok(vec![decision("ghost__tool", "ghost")]))), 5);
        assert!(matches!(
            router.plan("read it", &gateway).await,
            Err(RoutingError::NoValidDecisions { .. })
        ));
    }

    #[tokio::test]
    async fn validation_uses_the_catalog_read_after_planning() {
        let before = vec![tool("fs", "list", "List a directory"), tool("web", "fetch", "Fetch a URL")];
        let after = vec![tool("web", "fetch", "Fetch a URL")];
        let gateway = ShiftingGateway::new(vec![before, after]);
        let router = Router::new(Arc::new(FixedPlanner(Ok(vec![decision("fs__list", "fs"), decision("web__fetch", "web")]))), 5);

        let plan = router.plan("list then fetch", &gateway).await.unwrap();
        let tools: Vec<&str> = plan.iter().map(|step| step.selected_tool.as_str()).collect();
        assert_eq!(tools, vec!["web__fetch"]);

        let gateway = ShiftingGateway::new(vec![vec![tool("fs", "list", "List a directory")], Vec::new()]);
        let router = Router::new(Arc::new(FixedPlanner(Ok(vec![decision("fs__list", "fs")]))), 5);
        assert!(matches!(
            router.plan("list", &gateway).await,
            Err(RoutingError::NoValidDecisions { .. })
        ));
    }

    #[tokio::test]
    async fn route_caps_the_number_of_decisions() {
        let catalog = build_catalog(vec![tool("fs", "read", "Read a file")]);
        let many = (0..8).map(|_| decision("fs__read", "fs")).collect();
        let router = Router::new(Arc::new(FixedPlanner(Ok(many))), 3);
        assert_eq!(router.route("read", &catalog).await.unwrap().len(), 3);
    }
}
