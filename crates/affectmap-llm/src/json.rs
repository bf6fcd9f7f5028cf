//! Strict-JSON contract helpers for model responses.
//!
//! Models are instructed to answer with a single JSON object, but in practice
//! wrap it in code fences or prose. `parse_json_payload` recovers the object
//! explicitly instead of optional-chaining over a loose `Value`; numeric
//! fields go through `clamp_unit` so out-of-range or non-numeric values
//! become the safe default (0).

use serde_json::Value;

use crate::backend::LlmError;

/// Extract and parse the first JSON object embedded in a model reply.
pub fn parse_json_payload(content: &str) -> Result<Value, LlmError> {
    let trimmed = content.trim();

    // Fast path: the reply is the object.
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }

    // Otherwise take the outermost brace span. Handles ```json fences and
    // leading/trailing prose in one pass.
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    if let (Some(s), Some(e)) = (start, end) {
        if s < e {
            if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(&trimmed[s..=e]) {
                return Ok(v);
            }
        }
    }

    Err(LlmError::MalformedResponse(format!(
        "no JSON object in model reply: {}",
        truncate(trimmed, 120)
    )))
}

/// Clamp a JSON value to [0, 1]. Non-numeric, NaN, and missing values map to 0.
pub fn clamp_unit(v: &Value) -> f64 {
    match v.as_f64() {
        Some(f) if f.is_finite() => f.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// Read a string-array field, dropping non-string entries and truncating to
/// `max` items.
pub fn string_list(v: &Value, max: usize) -> Vec<String> {
    v.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str())
                .map(str::to_string)
                .take(max)
                .collect()
        })
        .unwrap_or_default()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
