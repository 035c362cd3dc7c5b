//! Analysis targets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Kind of content being analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Output of a tool invocation, persisted into the agent transcript.
    ToolResult,
    /// An inbound message from another party.
    Message,
    /// A prompt intercepted by the gateway on its way to the model provider.
    GatewayPrompt,
}

impl TargetType {
    /// Wire/database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::ToolResult => "tool_result",
            TargetType::Message => "message",
            TargetType::GatewayPrompt => "gateway_prompt",
        }
    }

    /// Parse from the wire/database string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tool_result" => Some(TargetType::ToolResult),
            "message" => Some(TargetType::Message),
            "gateway_prompt" => Some(TargetType::GatewayPrompt),
            _ => None,
        }
    }
}

/// One body of content submitted for analysis.
///
/// Immutable once constructed; consumed by [`crate::DetectionClient::analyze`].
#[derive(Debug, Clone)]
pub struct AnalysisTarget {
    /// What kind of content this is.
    pub target_type: TargetType,
    /// The full text to analyze.
    pub content: String,
    /// Where the content came from (tool name, sender, endpoint).
    pub source_label: String,
    /// Opaque caller metadata, carried through for logging.
    pub metadata: BTreeMap<String, String>,
}

impl AnalysisTarget {
    /// Creates a target with no metadata.
    pub fn new(
        target_type: TargetType,
        content: impl Into<String>,
        source_label: impl Into<String>,
    ) -> Self {
        Self {
            target_type,
            content: content.into(),
            source_label: source_label.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attaches a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Content length in characters.
    pub fn content_len(&self) -> usize {
        self.content.chars().count()
    }
}
