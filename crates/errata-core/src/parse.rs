//! Extraction of the structured `<response>{...}</response>` block from model text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::{MatchItem, PredictedError};

/// When a response is absent or unparseable, the paper is treated as if the
/// reviewer had reported an error, so it is never dropped from the judged set
/// by accident.
pub const UNPARSEABLE_IMPLIES_ERROR: bool = true;

static RESPONSE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<response>\s*(\{.*?\})\s*</response>").unwrap());

/// Which prompt a response answers. Reviewer responses must carry `has_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Review,
    Judge,
}

/// Structured view of a model response.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedResponse {
    pub parsed: bool,
    pub has_error: bool,
    pub errors: Vec<PredictedError>,
    pub matches: Vec<MatchItem>,
    /// Why parsing failed, when it did.
    pub parse_error: Option<String>,
}

impl ExtractedResponse {
    fn failed(reason: impl Into<String>) -> Self {
        Self {
            parsed: false,
            has_error: UNPARSEABLE_IMPLIES_ERROR,
            errors: vec![],
            matches: vec![],
            parse_error: Some(reason.into()),
        }
    }
}

/// Extract the structured result from a raw model response.
///
/// Pure and infallible: any problem with the input yields `parsed == false`.
pub fn extract(raw: Option<&str>, kind: ResponseKind) -> ExtractedResponse {
    let Some(raw) = raw else {
        return ExtractedResponse::failed("no response");
    };
    let object = match response_object(raw) {
        Ok(object) => object,
        Err(reason) => return ExtractedResponse::failed(reason),
    };

    let has_error = match (kind, object.get("has_error")) {
        (_, Some(v)) => match as_bool(v) {
            Some(b) => b,
            None => return ExtractedResponse::failed(format!("has_error is not a boolean: {v}")),
        },
        (ResponseKind::Review, None) => return ExtractedResponse::failed("missing has_error"),
        (ResponseKind::Judge, None) => false,
    };

    ExtractedResponse {
        parsed: true,
        has_error,
        errors: list(&object, "errors")
            .iter()
            .filter_map(predicted_error)
            .collect(),
        matches: list(&object, "matches").iter().filter_map(match_item).collect(),
        parse_error: None,
    }
}

/// Locate the `<response>` block and parse its JSON object.
fn response_object(raw: &str) -> Result<Map<String, Value>, String> {
    let caps = RESPONSE_BLOCK
        .captures(raw)
        .ok_or_else(|| "no <response>...</response> block found".to_string())?;
    let body = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(format!("<response> block is not an object: {other}")),
        Err(e) => Err(format!("invalid JSON in <response> block: {e}")),
    }
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Absent and `null` lists are empty.
fn list<'a>(object: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    match object.get(key) {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}

fn field_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn predicted_error(v: &Value) -> Option<PredictedError> {
    match v {
        Value::String(s) => Some(PredictedError {
            location: None,
            description: s.clone(),
        }),
        Value::Object(obj) => Some(PredictedError {
            location: field_str(obj, "location"),
            description: field_str(obj, "description").unwrap_or_default(),
        }),
        _ => None,
    }
}

fn match_item(v: &Value) -> Option<MatchItem> {
    match v {
        Value::String(s) => Some(MatchItem {
            location: None,
            description: Some(s.clone()),
        }),
        Value::Object(obj) => Some(MatchItem {
            location: field_str(obj, "location"),
            description: field_str(obj, "description"),
        }),
        _ => None,
    }
}
