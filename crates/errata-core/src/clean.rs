//! Plain-text normalization of paper content before it is sent to the reviewer.
//!
//! Content arrives either as plain text or as a list of chat content parts
//! (`{"type": "text", "text": ...}`, `{"type": "image_url", ...}`). Text parts
//! are kept in order, other parts are dropped, and the result is whitespace
//! normalized. Cleaning is idempotent.

use serde_json::Value;

/// Flatten and normalize raw paper content.
pub fn clean_content(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => match parts_from_json_string(s) {
            Some(parts) => clean_text(&join_parts(&parts)),
            None => clean_text(s),
        },
        Value::Array(parts) => clean_text(&join_parts(parts)),
        Value::Object(obj) => match obj.get("text") {
            Some(Value::String(s)) => clean_text(s),
            _ => clean_text(&content.to_string()),
        },
        other => clean_text(&other.to_string()),
    }
}

/// Datasets sometimes store the part list as a JSON string.
fn parts_from_json_string(s: &str) -> Option<Vec<Value>> {
    let trimmed = s.trim_start();
    if !trimmed.starts_with('[') {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(parts)) if !parts.is_empty() && parts.iter().all(is_part) => Some(parts),
        _ => None,
    }
}

fn is_part(v: &Value) -> bool {
    v.as_object().is_some_and(|o| o.contains_key("type"))
}

fn join_parts(parts: &[Value]) -> String {
    let texts: Vec<&str> = parts.iter().filter_map(part_text).collect();
    texts.join("\n\n")
}

fn part_text(part: &Value) -> Option<&str> {
    match part {
        Value::String(s) => Some(s),
        Value::Object(obj) => {
            let is_text = obj
                .get("type")
                .and_then(Value::as_str)
                .is_none_or(|t| t == "text");
            if is_text {
                obj.get("text").and_then(Value::as_str)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Normalize line endings and whitespace; prose is left untouched.
pub fn clean_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut prev_blank = true;
    let mut pending_blank = false;

    for line in unified.split('\n') {
        let line: String = line
            .chars()
            .filter(|c| !c.is_control() || *c == '\t')
            .collect();
        let line = line.trim_end();
        if line.is_empty() {
            if !prev_blank {
                pending_blank = true;
            }
            prev_blank = true;
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        out.push_str(line);
        pending_blank = false;
        prev_blank = false;
    }
    out
}
