//! Oracle-backed capabilities over an OpenAI-compatible chat API.

use std::{fmt::Write as _, sync::Arc, time::Duration};

use async_trait::async_trait;
use fleet_types::{RoutingDecision, StepResult, ToolDescriptor};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{config::OracleSettings, error::OracleError};

use super::{Planner, Synthesizer, VariableExtractor};

const MAX_RESULT_CHARS: usize = 2_000;

/// One chat round-trip.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
}

/// Transport for oracle prompts.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String, OracleError>;
}

/// reqwest-backed chat completions client.
pub struct HttpChatClient {
    client: reqwest::Client,
    settings: OracleSettings,
    api_key: Option<String>,
}

impl HttpChatClient {
    pub fn new(settings: OracleSettings) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| OracleError::Http(e.to_string()))?;
        let api_key = settings.api_key();
        Ok(Self { client, settings, api_key })
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, OracleError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            let value = format!("Bearer {key}");
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&value).map_err(|e| OracleError::Http(e.to_string()))?);
        }

        let body = ChatBody {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: self.settings.temperature,
        };

        let response = self
            .client
            .post(self.settings.endpoint())
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(OracleError::Response(format!("HTTP {status}: {text}")));
        }

        let text = response.text().await.map_err(|e| OracleError::Http(e.to_string()))?;
        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| OracleError::Serialization(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| OracleError::Response("missing choices".to_string()))
    }
}

/// Planner, synthesizer and extractor backed by a chat model.
pub struct OracleClient {
    chat: Arc<dyn ChatClient>,
}

impl OracleClient {
    pub fn new(chat: Arc<dyn ChatClient>) -> Self {
        Self { chat }
    }

    /// Client talking to the endpoint described by `settings`.
    pub fn from_settings(settings: OracleSettings) -> Result<Self, OracleError> {
        Ok(Self::new(Arc::new(HttpChatClient::new(settings)?)))
    }
}

#[async_trait]
impl Planner for OracleClient {
    async fn plan(&self, request: &str, catalog: &[ToolDescriptor], max_decisions: usize) -> Result<Vec<RoutingDecision>, OracleError> {
        let mut system = String::from(
            "You route user requests to tools. Reply with ONLY a JSON array of objects with fields \
             selectedTool, providerId, confidence (0..1), reasoning, parameters. Use tool names exactly \
             as listed. Parameter values may reference earlier step outputs with {{step_<i>_result}}.\n\nTools:\n",
        );
        for tool in catalog {
            let _ = writeln!(system, "- name: {}", tool.full_name);
            let _ = writeln!(system, "  provider: {}", tool.provider_id());
            let _ = writeln!(system, "  description: {}", tool.description);
            if !tool.derived_tags.is_empty() {
                let _ = writeln!(system, "  tags: {}", tool.derived_tags.join(", "));
            }
            let _ = writeln!(system, "  input_schema: {}", tool.parameter_schema);
        }
        let user = format!("Request: {request}\nReturn at most {max_decisions} steps in execution order.");

        let answer = self.chat.complete(ChatRequest { system, user }).await?;
        let value = parse_json_answer(&answer)?;
        let decisions = match value {
            Value::Array(items) => items,
            Value::Object(mut object) => match object.remove("decisions").or_else(|| object.remove("steps")) {
                Some(Value::Array(items)) => items,
                _ => vec![Value::Object(object)],
            },
            other => return Err(OracleError::Response(format!("expected a JSON array, got {other}"))),
        };
        let decisions: Vec<RoutingDecision> = decisions
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect();
        debug!(count = decisions.len(), "oracle proposed decisions");
        Ok(decisions)
    }
}

#[async_trait]
impl Synthesizer for OracleClient {
    async fn synthesize(&self, request: &str, results: &[StepResult]) -> Result<String, OracleError> {
        let system = "Answer the user's request using the tool results. Be concise and factual.".to_string();
        let mut user = format!("Request: {request}\n\nResults:\n");
        for result in results {
            let rendered = match (&result.result, &result.error) {
                (Some(value), _) => truncate(&value.to_string()),
                (None, Some(error)) => format!("error: {error}"),
                (None, None) => String::new(),
            };
            let _ = writeln!(user, "{}. {}: {rendered}", result.step_index + 1, result.tool);
        }
        let answer = self.chat.complete(ChatRequest { system, user }).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(OracleError::Response("empty synthesis".to_string()));
        }
        Ok(answer.to_string())
    }
}

#[async_trait]
impl VariableExtractor for OracleClient {
    async fn extract(&self, tool: &str, result: &Value) -> Result<Map<String, Value>, OracleError> {
        let system = "Extract values later steps may need (ids, names, paths, urls) from a tool result. \
                      Reply with ONLY a flat JSON object of snake_case keys."
            .to_string();
        let user = format!("Tool: {tool}\nResult: {}", truncate(&result.to_string()));
        let answer = self.chat.complete(ChatRequest { system, user }).await?;
        match parse_json_answer(&answer)? {
            Value::Object(map) => Ok(map),
            other => Err(OracleError::Response(format!("expected a JSON object, got {other}"))),
        }
    }
}

/// Parse a model answer that should be JSON, tolerating code fences and prose around it.
pub(crate) fn parse_json_answer(answer: &str) -> Result<Value, OracleError> {
    let trimmed = strip_code_fence(answer.trim());
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    let candidate = extract_json(trimmed).ok_or_else(|| OracleError::Serialization("no JSON found in answer".to_string()))?;
    serde_json::from_str(candidate).map_err(|e| OracleError::Serialization(e.to_string()))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['[', '{'])?;
    let closing = if text[start..].starts_with('[') { ']' } else { '}' };
    let end = text.rfind(closing)?;
    (end > start).then(|| &text[start..=end])
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_RESULT_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(MAX_RESULT_CHARS).collect();
    truncated.push('…');
    truncated
}
