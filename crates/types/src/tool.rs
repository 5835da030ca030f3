//! Namespaced tool identity and tool payloads.
//!
//! Every tool is globally addressed by a composite key of the owning provider
//! and the provider-local tool name. The key renders to a single string
//! (`<provider><sep><local>`) for catalogs and oracle prompts; the encoding is
//! reversible because provider identifiers are validated when they are
//! registered, not when names are parsed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Separator placed between the provider id and the local tool name.
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// Composite identity of a tool: owning provider plus provider-local name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolKey {
    /// Identifier of the provider exposing the tool.
    pub provider_id: String,
    /// Tool name as reported by the provider.
    pub local_name: String,
}

impl ToolKey {
    /// Build a key, rejecting provider identifiers that would make the
    /// encoded form ambiguous.
    pub fn new(provider_id: impl Into<String>, local_name: impl Into<String>) -> Result<Self, ToolNameError> {
        let provider_id = provider_id.into();
        let local_name = local_name.into();
        validate_provider_id(&provider_id)?;
        if local_name.is_empty() {
            return Err(ToolNameError::EmptyLocalName { full_name: provider_id });
        }
        Ok(Self { provider_id, local_name })
    }

    /// Render the key as `<provider><sep><local>`.
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.provider_id, TOOL_NAME_SEPARATOR, self.local_name)
    }

    /// Parse an encoded full name back into its parts.
    ///
    /// Splits at the first separator. This is exact as long as the provider id
    /// passed [`validate_provider_id`], which every registered provider has.
    pub fn decode(full_name: &str) -> Result<Self, ToolNameError> {
        let Some((provider_id, local_name)) = full_name.split_once(TOOL_NAME_SEPARATOR) else {
            return Err(ToolNameError::MissingSeparator {
                full_name: full_name.to_string(),
            });
        };
        if provider_id.is_empty() {
            return Err(ToolNameError::EmptyProviderId {
                full_name: full_name.to_string(),
            });
        }
        if local_name.is_empty() {
            return Err(ToolNameError::EmptyLocalName {
                full_name: full_name.to_string(),
            });
        }
        Ok(Self {
            provider_id: provider_id.to_string(),
            local_name: local_name.to_string(),
        })
    }
}

impl fmt::Display for ToolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.provider_id, TOOL_NAME_SEPARATOR, self.local_name)
    }
}

/// Check that a provider id can be used as the prefix of an encoded tool name.
///
/// The id must be non-empty, must not contain the separator, and must not end
/// with the separator's first character (`a_` + `__` + `b` would decode as `a`).
pub fn validate_provider_id(provider_id: &str) -> Result<(), ToolNameError> {
    if provider_id.is_empty() {
        return Err(ToolNameError::EmptyProviderId {
            full_name: String::new(),
        });
    }
    let trailing = TOOL_NAME_SEPARATOR.chars().next().unwrap_or('_');
    if provider_id.contains(TOOL_NAME_SEPARATOR) || provider_id.ends_with(trailing) {
        return Err(ToolNameError::AmbiguousProviderId {
            provider_id: provider_id.to_string(),
        });
    }
    Ok(())
}

/// Errors raised while building or decoding a [`ToolKey`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolNameError {
    #[error("tool name '{full_name}' does not contain the '__' separator")]
    MissingSeparator { full_name: String },

    #[error("tool name '{full_name}' has an empty provider id")]
    EmptyProviderId { full_name: String },

    #[error("tool name '{full_name}' has an empty local name")]
    EmptyLocalName { full_name: String },

    #[error("provider id '{provider_id}' contains or ends with the tool name separator")]
    AmbiguousProviderId { provider_id: String },
}

/// A tool published in the global catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Composite identity.
    pub key: ToolKey,
    /// Encoded `key`, kept alongside for lookups and display.
    pub full_name: String,
    /// Description, tagged with the owning provider when published by the catalog.
    pub description: String,
    /// JSON schema of the accepted arguments.
    pub parameter_schema: Value,
    /// Capability tags computed by the router.
    #[serde(default)]
    pub derived_tags: Vec<String>,
}

impl ToolDescriptor {
    pub fn new(key: ToolKey, description: impl Into<String>, parameter_schema: Value) -> Self {
        let full_name = key.encode();
        Self {
            key,
            full_name,
            description: description.into(),
            parameter_schema,
            derived_tags: Vec::new(),
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.key.provider_id
    }

    pub fn local_name(&self) -> &str {
        &self.key.local_name
    }

    /// Whether the schema declares a property with this name.
    pub fn accepts_parameter(&self, name: &str) -> bool {
        self.parameter_schema
            .get("properties")
            .and_then(Value::as_object)
            .is_some_and(|properties| properties.contains_key(name))
    }

    /// Names listed under the schema's `required` array.
    pub fn required_parameters(&self) -> Vec<String> {
        self.parameter_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// One item of a provider's call response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
    Other { value: Value },
}

/// Response payload of a successful tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Content items in provider order.
    pub content: Vec<ContentItem>,
    /// Structured result when the provider supplies one.
    #[serde(default)]
    pub structured: Option<Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::Text { text: text.into() }],
            structured: None,
        }
    }

    pub fn structured(value: Value) -> Self {
        Self {
            content: Vec::new(),
            structured: Some(value),
        }
    }

    /// Concatenated text items, newline separated.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text.as_str()),
                ContentItem::Other { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Best JSON rendering of the output.
    ///
    /// Prefers structured content; a single text item holding JSON is parsed;
    /// otherwise text items are joined into a string.
    pub fn to_value(&self) -> Value {
        if let Some(structured) = &self.structured {
            return structured.clone();
        }
        let has_other = self.content.iter().any(|item| matches!(item, ContentItem::Other { .. }));
        if has_other {
            return serde_json::to_value(&self.content).unwrap_or(Value::Null);
        }
        let text = self.joined_text();
        serde_json::from_str::<Value>(text.trim())
            .ok()
            .filter(|value| value.is_object() || value.is_array())
            .unwrap_or(Value::String(text))
    }
}
