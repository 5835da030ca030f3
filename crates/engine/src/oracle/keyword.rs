//! Deterministic capabilities used when no oracle is available.

use async_trait::async_trait;
use fleet_types::{RoutingDecision, StepResult, ToolDescriptor};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::catalog::{action_tags, tokenize};
use crate::error::OracleError;

use super::{Planner, Synthesizer, VariableExtractor};

const NAME_WEIGHT: usize = 3;
const TAG_WEIGHT: usize = 2;
const DESCRIPTION_WEIGHT: usize = 1;
const MAX_KEYWORD_CONFIDENCE: f64 = 0.6;
const PREVIEW_CHARS: usize = 200;

static STOPWORDS: &[&str] = &[
    "a", "an", "the", "me", "my", "i", "to", "of", "in", "on", "for", "and", "or", "is", "are", "it", "this", "that", "please", "can",
    "you", "all", "with", "from", "what", "here", "there",
];

/// Parameter names that take a filesystem location.
static PATH_PARAMETERS: &[&str] = &["path", "dir", "directory", "file", "filepath", "file_path", "filename", "root"];
/// Parameter names that take free text.
static QUERY_PARAMETERS: &[&str] = &["query", "q", "search", "text", "prompt", "question"];

static PATH_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|\s)((?:~|\.{1,2})?/[^\s"']*|\.{1,2}|[\w.-]+/[\w./-]*)"#).expect("path regex should compile")
});
static URL_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s"']+"#).expect("url regex should compile"));

/// Token-overlap planner.
///
/// Scores every tool by overlap between the request and the tool's name,
/// description and derived tags, and proposes the single best match with
/// inferred arguments.
#[derive(Debug, Default, Clone)]
pub struct KeywordPlanner;

impl KeywordPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous planning used directly by the router's fallback path.
    pub fn plan_sync(&self, request: &str, catalog: &[ToolDescriptor]) -> Vec<RoutingDecision> {
        let mut request_tokens: Vec<String> = tokenize(request)
            .into_iter()
            .filter(|token| !STOPWORDS.contains(&token.as_str()))
            .collect();
        if request_tokens.is_empty() {
            return Vec::new();
        }
        let verbs: Vec<String> = action_tags(&request_tokens).into_iter().map(str::to_string).collect();
        request_tokens.extend(verbs);

        let mut best: Option<(&ToolDescriptor, usize)> = None;
        for tool in catalog {
            let score = score_tool(tool, &request_tokens);
            if score > 0 && best.is_none_or(|(_, top)| score > top) {
                best = Some((tool, score));
            }
        }

        let Some((tool, score)) = best else {
            return Vec::new();
        };
        let confidence = (score as f64 / (request_tokens.len() * NAME_WEIGHT) as f64).min(MAX_KEYWORD_CONFIDENCE);
        let decision = RoutingDecision::new(&tool.key, confidence, format!("keyword match (score {score})"))
            .with_parameters(infer_parameters(tool, request));
        vec![decision]
    }
}

fn score_tool(tool: &ToolDescriptor, request_tokens: &[String]) -> usize {
    let name_tokens = tokenize(tool.local_name());
    let description_tokens = tokenize(&tool.description);
    let mut score = 0;
    for token in request_tokens {
        if name_tokens.contains(token) {
            score += NAME_WEIGHT;
        }
        if description_tokens.contains(token) {
            score += DESCRIPTION_WEIGHT;
        }
        if tool.derived_tags.iter().any(|tag| tokenize(tag).contains(token)) {
            score += TAG_WEIGHT;
        }
    }
    score
}

/// Fill path-like and free-text parameters the schema declares.
fn infer_parameters(tool: &ToolDescriptor, request: &str) -> Map<String, Value> {
    let required = tool.required_parameters();
    let mut parameters = Map::new();
    let path = PATH_LIKE
        .captures(request)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string());
    let url = URL_LIKE.find(request).map(|m| m.as_str().to_string());

    for name in PATH_PARAMETERS {
        if tool.accepts_parameter(name) || required.iter().any(|r| r == name) {
            parameters.insert((*name).to_string(), Value::String(path.clone().unwrap_or_else(|| ".".to_string())));
        }
    }
    if tool.accepts_parameter("url")
        && let Some(url) = url
    {
        parameters.insert("url".to_string(), Value::String(url));
    }
    for name in QUERY_PARAMETERS {
        if tool.accepts_parameter(name) {
            parameters.insert((*name).to_string(), Value::String(request.to_string()));
        }
    }
    parameters
}

#[async_trait]
impl Planner for KeywordPlanner {
    async fn plan(&self, request: &str, catalog: &[ToolDescriptor], _max_decisions: usize) -> Result<Vec<RoutingDecision>, OracleError> {
        Ok(self.plan_sync(request, catalog))
    }
}

/// Plain-text summary of step results.
#[derive(Debug, Default, Clone, Copy)]
pub struct SummarySynthesizer;

impl SummarySynthesizer {
    pub fn summarize(request: &str, results: &[StepResult]) -> String {
        let succeeded = results.iter().filter(|result| result.success).count();
        let mut text = format!("Completed {succeeded}/{} step(s) for \"{request}\".", results.len());
        for result in results {
            let detail = match (&result.result, &result.error) {
                (Some(value), _) => preview(value),
                (None, Some(error)) => format!("error: {error}"),
                (None, None) => String::new(),
            };
            text.push_str(&format!("\n- {}: {detail}", result.tool));
        }
        text
    }
}

#[async_trait]
impl Synthesizer for SummarySynthesizer {
    async fn synthesize(&self, request: &str, results: &[StepResult]) -> Result<String, OracleError> {
        Ok(Self::summarize(request, results))
    }
}

fn preview(value: &Value) -> String {
    let rendered = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    if rendered.chars().count() <= PREVIEW_CHARS {
        return rendered;
    }
    let mut truncated: String = rendered.chars().take(PREVIEW_CHARS).collect();
    truncated.push('…');
    truncated
}

/// Lifts top-level scalar fields of an object result into variables.
#[derive(Debug, Clone)]
pub struct StructuredVariableExtractor {
    max_variables: usize,
}

impl Default for StructuredVariableExtractor {
    fn default() -> Self {
        Self { max_variables: 20 }
    }
}

impl StructuredVariableExtractor {
    pub fn extract_sync(&self, result: &Value) -> Map<String, Value> {
        let Value::Object(fields) = result else {
            return Map::new();
        };
        fields
            .iter()
            .filter(|(_, value)| matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)))
            .take(self.max_variables)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

#[async_trait]
impl VariableExtractor for StructuredVariableExtractor {
    async fn extract(&self, _tool: &str, result: &Value) -> Result<Map<String, Value>, OracleError> {
        Ok(self.extract_sync(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::build_catalog;
    use fleet_types::{StepMetadata, ToolKey};
    use serde_json::json;

    fn filesystem_catalog() -> Vec<ToolDescriptor> {
        let schema = json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]});
        build_catalog(vec![
            ToolDescriptor::new(ToolKey::new("filesystem", "read_file").unwrap(), "[filesystem] Read file contents", schema.clone()),
            ToolDescriptor::new(ToolKey::new("filesystem", "list_directory").unwrap(), "[filesystem] List directory contents", schema),
            ToolDescriptor::new(
                ToolKey::new("search", "web_search").unwrap(),
                "[search] Search the web",
                json!({"type": "object", "properties": {"query": {"type": "string"}}}),
            ),
        ])
    }

    #[test]
    fn listing_request_picks_the_list_tool() {
        let decisions = KeywordPlanner::new().plan_sync("list the files here", &filesystem_catalog());
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].selected_tool, "filesystem__list_directory");
        assert_eq!(decisions[0].parameters["path"], json!("."));
        assert!(decisions[0].confidence > 0.0 && decisions[0].confidence <= MAX_KEYWORD_CONFIDENCE);
    }

    #[test]
    fn explicit_paths_and_queries_are_inferred() {
        let catalog = filesystem_catalog();
        let read = KeywordPlanner::new().plan_sync("read file ./src/main.rs", &catalog);
        assert_eq!(read[0].selected_tool, "filesystem__read_file");
        assert_eq!(read[0].parameters["path"], json!("./src/main.rs"));

        let search = KeywordPlanner::new().plan_sync("search rust async runtimes", &catalog);
        assert_eq!(search[0].selected_tool, "search__web_search");
        assert_eq!(search[0].parameters["query"], json!("search rust async runtimes"));
    }

    #[test]
    fn unrelated_requests_yield_no_decision() {
        assert!(KeywordPlanner::new().plan_sync("bake a cake", &filesystem_catalog()).is_empty());
        assert!(KeywordPlanner::new().plan_sync("the", &filesystem_catalog()).is_empty());
    }

    #[test]
    fn summary_lists_each_step() {
        let results = vec![
            StepResult::succeeded(0, "fs__list", json!("a.txt"), 3, StepMetadata::default()),
            StepResult::failed(1, "fs__read", "denied", 1, StepMetadata::default()),
        ];
        let text = SummarySynthesizer::summarize("look around", &results);
        assert!(text.starts_with("Completed 1/2 step(s)"));
        assert!(text.contains("- fs__list: a.txt"));
        assert!(text.contains("- fs__read: error: denied"));
    }

    #[test]
    fn extractor_keeps_scalar_fields() {
        let vars = StructuredVariableExtractor::default().extract_sync(&json!({"id": 7, "name": "x", "items": [1]}));
        assert_eq!(vars.len(), 2);
        assert_eq!(vars["id"], json!(7));
        assert!(StructuredVariableExtractor::default().extract_sync(&json!("text")).is_empty());
    }
}
