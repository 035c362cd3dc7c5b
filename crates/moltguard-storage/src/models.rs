//! Data models for storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use moltguard_core::{AnalysisTarget, TargetType, Verdict};

use crate::repository::{create_preview, hash_content};

/// Kind of user feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    /// A detection that should not have fired.
    FalsePositive,
    /// A detection that should have fired but did not.
    MissedDetection,
}

impl FeedbackType {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::FalsePositive => "false_positive",
            FeedbackType::MissedDetection => "missed_detection",
        }
    }

    /// Parse from database string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "false_positive" => Some(FeedbackType::FalsePositive),
            "missed_detection" => Some(FeedbackType::MissedDetection),
            _ => None,
        }
    }
}

/// A persisted analysis log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Strictly increasing identifier, never reused.
    pub id: i64,
    /// What kind of content was analyzed.
    pub target_type: TargetType,
    /// Where the content came from.
    pub source_label: Option<String>,
    /// SHA-256 hash of the analyzed content.
    pub content_hash: String,
    /// Short preview of the content.
    pub preview: String,
    /// Content length in characters.
    pub content_length: i64,
    /// Number of chunks successfully analyzed.
    pub chunks_analyzed: i64,
    /// The aggregated verdict.
    pub verdict: Verdict,
    /// Wall-clock duration of the analysis in milliseconds.
    pub duration_ms: i64,
    /// Whether the caller's policy blocked the content.
    pub blocked: bool,
    /// When the entry was appended.
    pub created_at: DateTime<Utc>,
}

/// Parameters for appending an analysis log entry.
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub target_type: TargetType,
    pub source_label: Option<String>,
    pub content_hash: String,
    pub preview: String,
    pub content_length: i64,
    pub chunks_analyzed: i64,
    pub verdict: Verdict,
    pub duration_ms: i64,
    /// Set by the caller's policy (detection AND blocking enabled), never
    /// by the detection pipeline itself.
    pub blocked: bool,
}

impl NewAnalysis {
    /// Builds a log entry from a target and its verdict.
    pub fn from_target(
        target: &AnalysisTarget,
        verdict: &Verdict,
        duration_ms: i64,
        blocked: bool,
    ) -> Self {
        Self {
            target_type: target.target_type,
            source_label: Some(target.source_label.clone()),
            content_hash: hash_content(&target.content),
            preview: create_preview(&target.content),
            content_length: target.content_len() as i64,
            chunks_analyzed: verdict.chunks_analyzed as i64,
            verdict: verdict.clone(),
            duration_ms,
            blocked,
        }
    }
}

/// A persisted feedback entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Strictly increasing identifier.
    pub id: i64,
    /// The analysis this feedback refers to, when known. Absent for
    /// missed-detection reports.
    pub analysis_id: Option<i64>,
    /// Kind of feedback.
    pub feedback_type: FeedbackType,
    /// User-provided reason.
    pub reason: String,
    /// When the entry was appended.
    pub created_at: DateTime<Utc>,
}

/// Parameters for appending a feedback entry.
#[derive(Debug, Clone)]
pub struct NewFeedback {
    /// Referenced analysis id; not required to exist.
    pub analysis_id: Option<i64>,
    pub feedback_type: FeedbackType,
    pub reason: String,
}

/// Aggregate statistics over the full analysis log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardStats {
    /// Total analyses ever logged.
    pub total_analyses: i64,
    /// Total entries with `blocked = true`.
    pub total_blocked: i64,
    /// Blocked entries in the 24 hours before the query.
    pub blocked_last_24h: i64,
    /// Mean analysis duration in milliseconds, 0 when the log is empty.
    pub avg_duration_ms: i64,
}

/// Feedback counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub false_positives: i64,
    pub missed_detections: i64,
}
