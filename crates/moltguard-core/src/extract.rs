//! Content extraction from host event payloads.
//!
//! Host runtimes deliver tool results and messages in several shapes. This
//! module reduces them all to plain text for analysis. Nothing usable is not
//! an error, just "no target produced".

use serde_json::Value;

/// Extracts analyzable text from a tool-result or message payload.
///
/// Tries, in order:
/// - a plain string `content` field,
/// - a segmented `content` list (`{type: "text", text}` and
///   `{type: "tool_result", content}` parts),
/// - a plain string `text` field,
/// - a plain string `result` field,
/// - falling back to the JSON serialization when it is long enough to be
///   worth scanning.
pub fn extract_content(message: &Value) -> Option<String> {
    let obj = message.as_object()?;

    if let Some(content) = obj.get("content") {
        if let Some(text) = content.as_str() {
            return Some(text.to_string());
        }

        if let Some(parts) = content.as_array() {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|part| {
                    let part = part.as_object()?;
                    match part.get("type")?.as_str()? {
                        "text" => part.get("text")?.as_str(),
                        "tool_result" => part.get("content")?.as_str(),
                        _ => None,
                    }
                })
                .collect();
            if !texts.is_empty() {
                return Some(texts.join("\n"));
            }
        }
    }

    if let Some(text) = obj.get("text").and_then(Value::as_str) {
        return Some(text.to_string());
    }

    if let Some(result) = obj.get("result").and_then(Value::as_str) {
        return Some(result.to_string());
    }

    // Unknown shape: scan the raw serialization if there is enough of it.
    let serialized = message.to_string();
    if serialized.len() > 100 {
        return Some(serialized);
    }

    None
}
