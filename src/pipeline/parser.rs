//! Model-response parsing: isolate the JSON object the vision model was asked
//! for, and read its fields leniently.
//!
//! Vision models wrap JSON in prose or code fences and sometimes emit numbers
//! as strings (or the reverse). The extractor finds the first balanced
//! `{...}` span, string- and escape-aware, so braces inside values don't
//! confuse it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JsonExtractError {
    #[error("No JSON object found in model response")]
    NoObject,

    #[error("JSON object in model response is never closed")]
    Unbalanced,

    #[error("Malformed JSON: {0}")]
    Malformed(String),
}

/// Return the first balanced `{...}` span in `text`.
pub fn extract_json_object(text: &str) -> Result<&str, JsonExtractError> {
    let start = text.find('{').ok_or(JsonExtractError::NoObject)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    Err(JsonExtractError::Unbalanced)
}

/// Extract the first JSON object from `text` and deserialize it.
///
/// Malformed JSON is a hard failure: no partial recovery.
pub fn parse_json_object<T: DeserializeOwned>(text: &str) -> Result<T, JsonExtractError> {
    let json = extract_json_object(text)?;
    serde_json::from_str(json).map_err(|e| JsonExtractError::Malformed(e.to_string()))
}

/// Parse an array leniently: skip items that fail to deserialize.
/// Returns the parsed items and how many were skipped.
pub(crate) fn parse_array_lenient<T: DeserializeOwned>(items: &[Value]) -> (Vec<T>, usize) {
    let mut parsed = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for item in items {
        match serde_json::from_value(item.clone()) {
            Ok(value) => parsed.push(value),
            Err(_) => skipped += 1,
        }
    }
    (parsed, skipped)
}

// ──────────────────────────────────────────────
// Lenient field readers
// ──────────────────────────────────────────────

/// String field that may arrive as a number or null.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

pub(crate) fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = lenient_string(deserializer)?;
    Ok(if s.is_empty() { None } else { Some(s) })
}

/// Numeric field that may arrive as a string, possibly with a unit mark.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(value_as_f64))
}

pub(crate) fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_f64(deserializer)?
        .filter(|n| *n >= 0.0 && n.fract() == 0.0 && *n <= u32::MAX as f64)
        .map(|n| n as u32))
}

/// Confidence in 0.0..=1.0; missing or unreadable reads as 0.0.
pub(crate) fn lenient_confidence<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_f64(deserializer)?
        .map(|c| c.clamp(0.0, 1.0) as f32)
        .unwrap_or(0.0))
}

pub(crate) fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => leading_number(s),
        _ => None,
    }
}

/// Leading decimal number of `text`, ignoring trailing unit marks
/// (`48"` → 48, `22.5°` → 22.5).
pub(crate) fn leading_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && *c == '-')))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[..end].parse::<f64>().ok()
}
