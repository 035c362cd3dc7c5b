//! Guard engine: host events in, analysis log entries out.
//!
//! The engine is what the host adapter calls when a tool result lands or a
//! message arrives. Tool-result analysis runs as a spawned task so the event
//! dispatcher is never held up; the task writes the store on completion and
//! swallows failures (fail-open). Concurrency is bounded by the detection
//! client's shared semaphore, not by spawning discipline here.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use moltguard_core::{
    extract_content, AnalysisTarget, DetectionClient, TargetType, Verdict, MIN_MESSAGE_LEN,
    MIN_TOOL_RESULT_LEN, RISK_CONFIDENCE_THRESHOLD,
};
use moltguard_storage::{Database, NewAnalysis};

/// Orchestrates the content-guard pipeline for host events.
pub struct GuardEngine {
    detector: Arc<DetectionClient>,
    db: Arc<Database>,
    block_on_risk: bool,
}

impl GuardEngine {
    /// Creates an engine.
    pub fn new(detector: Arc<DetectionClient>, db: Arc<Database>, block_on_risk: bool) -> Self {
        Self {
            detector,
            db,
            block_on_risk,
        }
    }

    /// The shared detection client.
    pub fn detector(&self) -> &Arc<DetectionClient> {
        &self.detector
    }

    /// Analyzes a tool-result payload in the background.
    ///
    /// Content below the minimum length, or a payload nothing can be
    /// extracted from, is skipped and `None` is returned. Otherwise the
    /// returned handle completes once the verdict has been logged; the
    /// dispatcher that delivered the event never waits on it.
    pub fn analyze_tool_result(&self, tool_name: &str, message: &Value) -> Option<JoinHandle<()>> {
        let content = match extract_content(message) {
            Some(content) => content,
            None => {
                debug!("No content extracted from tool result of \"{}\"", tool_name);
                return None;
            }
        };

        if content.chars().count() < MIN_TOOL_RESULT_LEN {
            debug!(
                "Skipping short tool result from \"{}\" ({} chars)",
                tool_name,
                content.chars().count()
            );
            return None;
        }

        let target = AnalysisTarget::new(TargetType::ToolResult, content, tool_name);
        let detector = self.detector.clone();
        let db = self.db.clone();
        let block_on_risk = self.block_on_risk;

        Some(tokio::spawn(async move {
            let started = Instant::now();
            match detector.analyze(&target).await {
                Ok(verdict) => {
                    let detected = verdict.detected_at(RISK_CONFIDENCE_THRESHOLD);
                    let blocked = detected && block_on_risk;
                    if detected {
                        warn!(
                            "INJECTION DETECTED in tool result from \"{}\": {}",
                            target.source_label, verdict.reason
                        );
                    }
                    log(&db, &target, &verdict, started.elapsed().as_millis() as i64, blocked);
                }
                Err(e) => {
                    // Fail open: the failure is logged, nothing is blocked,
                    // and no fabricated verdict reaches the store.
                    warn!("Tool result analysis failed: {}", e);
                }
            }
        }))
    }

    /// Analyzes an inbound message. Returns `None` when the content is below
    /// the message minimum length. Message analyses are never blocking; the
    /// entry is logged with `blocked = false` regardless of policy.
    pub async fn analyze_message(
        &self,
        from: &str,
        content: &str,
    ) -> moltguard_core::Result<Option<Verdict>> {
        if content.chars().count() < MIN_MESSAGE_LEN {
            return Ok(None);
        }

        let target = AnalysisTarget::new(TargetType::Message, content, from);
        let started = Instant::now();
        let verdict = self.detector.analyze(&target).await?;

        if verdict.is_injection {
            warn!(
                "Suspicious content in message from \"{}\" ({} chars): {}",
                from,
                target.content_len(),
                verdict.reason
            );
        }

        log(&self.db, &target, &verdict, started.elapsed().as_millis() as i64, false);
        Ok(Some(verdict))
    }
}

fn log(db: &Database, target: &AnalysisTarget, verdict: &Verdict, duration_ms: i64, blocked: bool) {
    let entry = NewAnalysis::from_target(target, verdict, duration_ms, blocked);
    if let Err(e) = db.log_analysis(entry) {
        warn!("Failed to log analysis: {}", e);
    }
}
