//! Verdicts and findings.

use serde::{Deserialize, Serialize};

/// One suspicious span detected within a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Index of the chunk the span was found in.
    pub chunk_index: usize,
    /// Excerpt of the suspicious content.
    pub suspicious_content: String,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f64,
    /// Free-form category tag from the detection service.
    #[serde(default)]
    pub category: Option<String>,
}

/// Aggregated injection-risk assessment for one content body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the service flagged any chunk as an injection.
    pub is_injection: bool,
    /// Maximum confidence across findings, 0.0 when there are none.
    pub confidence: f64,
    /// Explanation, taken from the highest-confidence finding.
    pub reason: String,
    /// All findings, in chunk-index order.
    pub findings: Vec<Finding>,
    /// Number of chunks that were successfully analyzed.
    pub chunks_analyzed: usize,
}

impl Verdict {
    /// A clean verdict over `chunks_analyzed` chunks.
    pub fn clean(chunks_analyzed: usize) -> Self {
        Self {
            is_injection: false,
            confidence: 0.0,
            reason: "no injection detected".to_string(),
            findings: Vec::new(),
            chunks_analyzed,
        }
    }

    /// Aggregates per-chunk results into one verdict.
    ///
    /// `flagged` is true when the service marked any successfully analyzed
    /// chunk as an injection. Findings are re-sorted into chunk-index order
    /// regardless of completion order; confidence is the maximum across
    /// findings and the reason comes from the highest-confidence finding.
    pub fn aggregate(mut findings: Vec<Finding>, flagged: bool, chunks_analyzed: usize) -> Self {
        findings.sort_by_key(|f| f.chunk_index);

        let top = findings
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

        let (confidence, reason) = match top {
            Some(finding) => (
                finding.confidence,
                format!("suspicious content: {}", excerpt(&finding.suspicious_content)),
            ),
            None => (0.0, "no injection detected".to_string()),
        };

        Self {
            is_injection: flagged,
            confidence,
            reason,
            findings,
            chunks_analyzed,
        }
    }

    /// True when the verdict meets or exceeds `threshold`.
    pub fn detected_at(&self, threshold: f64) -> bool {
        self.is_injection && self.confidence >= threshold
    }
}

/// Shortened single-line excerpt for reasons and log lines.
fn excerpt(s: &str) -> String {
    const MAX: usize = 120;
    let cleaned: String = s
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .take(MAX)
        .collect();
    if s.chars().count() > MAX {
        format!("{}...", cleaned)
    } else {
        cleaned
    }
}
