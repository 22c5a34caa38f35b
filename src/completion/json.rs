//! JSON recovery from model replies.
//!
//! Even when told to answer with a bare JSON object, models wrap replies in
//! ```` ```json ```` fences or add a sentence before the payload. These
//! helpers find the JSON value inside such a reply.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n(.*?)\n?```").unwrap());

/// Parse the JSON payload of a model reply.
///
/// Order of attempts: the whole reply, the first fenced block, then the
/// widest `{…}` / `[…]` span.
pub fn extract_json(reply: &str) -> Result<Value, String> {
    let trimmed = reply.trim().trim_start_matches('\u{FEFF}');
    if trimmed.is_empty() {
        return Err("empty reply".to_string());
    }

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }

    if let Some(caps) = RE_FENCED.captures(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(caps[1].trim()) {
            return Ok(v);
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                    return Ok(v);
                }
            }
        }
    }

    let preview: String = trimmed.chars().take(80).collect();
    Err(format!("no JSON value found in reply starting with {preview:?}"))
}

/// Compact single-line JSON of a schema, for embedding in a system prompt.
pub fn schema_instructions(schema_name: &str, json_schema: &Value) -> String {
    format!(
        "Respond with a single JSON value named \"{schema_name}\" that conforms to this JSON schema. \
Output ONLY the JSON, no commentary and no code fences.\n{}",
        serde_json::to_string(json_schema).unwrap_or_default()
    )
}
