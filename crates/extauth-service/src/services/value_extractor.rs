//! JSON path extraction for claim values.
//!
//! Paths are dot separated. A backslash escapes the next character, so
//! `headers.x\.forwarded` addresses the key `x.forwarded`. Numeric segments
//! index arrays, and `#` yields the length of an array. When `#` is followed
//! by further segments the rest of the path is applied to every element and
//! the matches are collected into an array.
//!
//! Resolved values render as text: strings verbatim, numbers and booleans in
//! JSON form, objects and arrays as compact JSON. Null and absent values
//! render as the empty string.

use crate::models::{ClaimSource, ClaimTemplate};
use serde_json::Value;
use std::sync::Arc;

/// Strategy for resolving a path expression against a JSON document.
pub trait ValueExtractor: Send + Sync {
    fn extract(&self, document: &Value, path: &str) -> String;
}

/// Resolves claim templates against authorization data.
#[derive(Clone)]
pub struct ClaimResolver {
    extractor: Arc<dyn ValueExtractor>,
}

impl ClaimResolver {
    pub fn new(extractor: Arc<dyn ValueExtractor>) -> Self {
        Self { extractor }
    }

    pub fn resolve(&self, template: &ClaimTemplate, data: &Value) -> String {
        match &template.source {
            ClaimSource::Static(value) => value.clone(),
            ClaimSource::FromJson(path) => self.extractor.extract(data, path),
        }
    }

    /// Resolve every template into a JSON object of string members.
    pub fn resolve_object(&self, templates: &[ClaimTemplate], data: &Value) -> Value {
        Value::Object(
            templates
                .iter()
                .map(|t| (t.name.clone(), Value::String(self.resolve(t, data))))
                .collect(),
        )
    }
}

impl Default for ClaimResolver {
    fn default() -> Self {
        Self::new(Arc::new(DottedPathExtractor))
    }
}

/// Dot-separated path extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct DottedPathExtractor;

impl ValueExtractor for DottedPathExtractor {
    fn extract(&self, document: &Value, path: &str) -> String {
        if path.is_empty() {
            return String::new();
        }

        let segments = split_path(path);
        resolve(document, &segments)
            .map(|value| render(&value))
            .unwrap_or_default()
    }
}

fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '.' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);

    segments
}

fn resolve(value: &Value, segments: &[String]) -> Option<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value.clone());
    };

    match value {
        Value::Object(map) => map.get(head.as_str()).and_then(|v| resolve(v, rest)),
        Value::Array(items) if head == "#" => {
            if rest.is_empty() {
                Some(Value::from(items.len()))
            } else {
                Some(Value::Array(
                    items.iter().filter_map(|item| resolve(item, rest)).collect(),
                ))
            }
        }
        Value::Array(items) => head
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index))
            .and_then(|v| resolve(v, rest)),
        _ => None,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
