//! Model-provider wire dialects.
//!
//! The gateway speaks two request shapes, detected by path rather than by
//! any client-declared mode. Prompt extraction and redaction both operate
//! on the raw JSON payload so forwarded requests keep every field the
//! client sent.

use serde_json::Value;

/// One of the two supported model-provider request shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// The "messages" dialect (`POST /v1/messages`).
    Messages,
    /// The "completions" dialect (`POST /v1/chat/completions`).
    Completions,
}

impl Dialect {
    /// Detects the dialect from a request path.
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/v1/messages" => Some(Dialect::Messages),
            "/v1/chat/completions" => Some(Dialect::Completions),
            _ => None,
        }
    }

    /// The conventional path for this dialect.
    pub fn path(&self) -> &'static str {
        match self {
            Dialect::Messages => "/v1/messages",
            Dialect::Completions => "/v1/chat/completions",
        }
    }

    /// Short name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Messages => "messages",
            Dialect::Completions => "completions",
        }
    }
}

/// Extracts the analyzable prompt text from a request payload.
///
/// Covers the system prompt plus all user-role message content, in both the
/// plain-string and segmented-content-block forms. Assistant turns are not
/// analyzed: they came from the model, not from outside.
pub fn extract_prompt(dialect: Dialect, payload: &Value) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();

    if dialect == Dialect::Messages {
        // Top-level system prompt: string or list of text blocks.
        if let Some(system) = payload.get("system") {
            if let Some(text) = system.as_str() {
                parts.push(text.to_string());
            } else if let Some(blocks) = system.as_array() {
                parts.extend(text_blocks(blocks));
            }
        }
    }

    if let Some(messages) = payload.get("messages").and_then(Value::as_array) {
        for msg in messages {
            let role = msg.get("role").and_then(Value::as_str).unwrap_or("");
            // The completions dialect carries its system prompt as a message.
            let wanted = role == "user" || (dialect == Dialect::Completions && role == "system");
            if !wanted {
                continue;
            }

            if let Some(content) = msg.get("content") {
                if let Some(text) = content.as_str() {
                    parts.push(text.to_string());
                } else if let Some(blocks) = content.as_array() {
                    parts.extend(text_blocks(blocks));
                }
            }
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

/// Text from `{type: "text", text}` content blocks.
fn text_blocks(blocks: &[Value]) -> Vec<String> {
    blocks
        .iter()
        .filter_map(|block| {
            if block.get("type")?.as_str()? == "text" {
                Some(block.get("text")?.as_str()?.to_string())
            } else {
                None
            }
        })
        .collect()
}

/// Replaces every occurrence of each flagged span in every string field of
/// the payload with `marker`. Returns the number of replacements made.
///
/// Walking the whole tree (rather than just the extracted fields) means a
/// span hiding in a shape we did not extract from still gets stripped.
pub fn redact_spans(payload: &mut Value, spans: &[String], marker: &str) -> usize {
    let spans: Vec<&String> = spans.iter().filter(|s| !s.is_empty()).collect();
    if spans.is_empty() {
        return 0;
    }

    let mut replaced = 0;
    redact_value(payload, &spans, marker, &mut replaced);
    replaced
}

fn redact_value(value: &mut Value, spans: &[&String], marker: &str, replaced: &mut usize) {
    match value {
        Value::String(s) => {
            for span in spans {
                if s.contains(span.as_str()) {
                    *replaced += s.matches(span.as_str()).count();
                    *s = s.replace(span.as_str(), marker);
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                redact_value(item, spans, marker, replaced);
            }
        }
        Value::Object(obj) => {
            for (_, val) in obj.iter_mut() {
                redact_value(val, spans, marker, replaced);
            }
        }
        _ => {}
    }
}

/// Error body for a rejected request, in the dialect's own error shape so
/// provider SDKs surface it cleanly.
pub fn policy_violation_body(dialect: Dialect, reason: &str) -> Value {
    match dialect {
        Dialect::Messages => serde_json::json!({
            "type": "error",
            "error": {
                "type": "policy_violation",
                "message": format!("Request blocked by MoltGuard: {}", reason),
            }
        }),
        Dialect::Completions => serde_json::json!({
            "error": {
                "type": "policy_violation",
                "code": "prompt_injection_detected",
                "message": format!("Request blocked by MoltGuard: {}", reason),
            }
        }),
    }
}
