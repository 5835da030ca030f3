//! `{{name}}` substitution in step parameters.
//!
//! A string that is exactly one token takes the referenced value with its JSON
//! type intact. Tokens embedded in longer strings are rendered as text.
//! Tokens that do not resolve stay in place verbatim.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-\[\]]+)\s*\}\}").expect("template regex should compile"));

/// Substitute tokens in every string of `parameters`, recursing into arrays and objects.
pub fn enrich_parameters(parameters: &Map<String, Value>, lookup: &Map<String, Value>) -> Map<String, Value> {
    parameters
        .iter()
        .map(|(key, value)| (key.clone(), enrich_value(value, lookup)))
        .collect()
}

pub fn enrich_value(value: &Value, lookup: &Map<String, Value>) -> Value {
    match value {
        Value::String(text) => enrich_string(text, lookup),
        Value::Array(items) => Value::Array(items.iter().map(|item| enrich_value(item, lookup)).collect()),
        Value::Object(fields) => Value::Object(enrich_parameters(fields, lookup)),
        other => other.clone(),
    }
}

fn enrich_string(text: &str, lookup: &Map<String, Value>) -> Value {
    if let Some(captures) = TOKEN.captures(text)
        && let Some(whole) = captures.get(0)
        && whole.start() == 0
        && whole.end() == text.len()
    {
        return match resolve(&captures[1], lookup) {
            Some(value) => value.clone(),
            None => Value::String(text.to_string()),
        };
    }

    let replaced = TOKEN.replace_all(text, |captures: &Captures<'_>| match resolve(&captures[1], lookup) {
        Some(value) => render(value),
        None => captures[0].to_string(),
    });
    Value::String(replaced.into_owned())
}

/// Look up `name`, first as a whole key and then as a dotted path with `[i]` indices.
fn resolve<'a>(name: &str, lookup: &'a Map<String, Value>) -> Option<&'a Value> {
    if let Some(value) = lookup.get(name) {
        return Some(value);
    }
    let mut segments = name.split('.');
    let (root, root_indices) = split_indices(segments.next()?);
    let mut current = lookup.get(root)?;
    for index in root_indices {
        current = current.get(index)?;
    }
    for segment in segments {
        let (key, indices) = split_indices(segment);
        if !key.is_empty() {
            current = match current {
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                other => other.get(key)?,
            };
        }
        for index in indices {
            current = current.get(index)?;
        }
    }
    Some(current)
}

fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    let Some(open) = segment.find('[') else {
        return (segment, Vec::new());
    };
    let indices = segment[open..]
        .split(['[', ']'])
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse::<usize>().ok())
        .collect();
    (&segment[..open], indices)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
