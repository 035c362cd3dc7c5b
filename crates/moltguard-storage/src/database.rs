//! High-level database interface.

use std::path::PathBuf;

use directories::ProjectDirs;
use tracing::info;

use crate::error::{Result, StorageError};
use crate::models::{
    AnalysisRecord, FeedbackRecord, FeedbackStats, GuardStats, NewAnalysis, NewFeedback,
};
use crate::pool::ConnectionPool;
use crate::repository::{AnalysesRepo, FeedbackRepo};

/// High-level database interface for MoltGuard.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Create a new database in the default app data directory.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_db_path()?)
    }

    /// Create a new database at a specific path.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening analysis log at: {:?}", path);
        let pool = ConnectionPool::new(&path)?;

        Ok(Self { pool })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let pool = ConnectionPool::in_memory()?;
        Ok(Self { pool })
    }

    /// Get the default database path.
    pub fn default_db_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "moltguard", "moltguard")
            .ok_or_else(|| StorageError::Config("Could not determine app data directory".into()))?;

        Ok(proj_dirs.data_dir().join("moltguard.db"))
    }

    // === Analyses ===

    /// Append an analysis log entry. Returns the assigned id, which is
    /// durable before this call returns.
    pub fn log_analysis(&self, new: NewAnalysis) -> Result<i64> {
        let conn = self.pool.get()?;
        AnalysesRepo::insert(&conn, new)
    }

    /// Get an analysis entry by id.
    pub fn get_analysis(&self, id: i64) -> Result<Option<AnalysisRecord>> {
        let conn = self.pool.get()?;
        AnalysesRepo::get_by_id(&conn, id)
    }

    /// Get the last `limit` analysis entries, newest first.
    pub fn get_recent_logs(&self, limit: i64) -> Result<Vec<AnalysisRecord>> {
        let conn = self.pool.get()?;
        AnalysesRepo::get_recent(&conn, limit)
    }

    /// Get the last `limit` entries whose verdict flagged an injection.
    pub fn get_recent_detections(&self, limit: i64) -> Result<Vec<AnalysisRecord>> {
        let conn = self.pool.get()?;
        AnalysesRepo::get_recent_detections(&conn, limit)
    }

    /// Aggregate statistics over the full log.
    pub fn get_stats(&self) -> Result<GuardStats> {
        let conn = self.pool.get()?;
        AnalysesRepo::stats(&conn)
    }

    // === Feedback ===

    /// Append a feedback entry.
    pub fn log_feedback(&self, new: NewFeedback) -> Result<i64> {
        let conn = self.pool.get()?;
        FeedbackRepo::insert(&conn, new)
    }

    /// Get the last `limit` feedback entries, newest first.
    pub fn get_recent_feedback(&self, limit: i64) -> Result<Vec<FeedbackRecord>> {
        let conn = self.pool.get()?;
        FeedbackRepo::get_recent(&conn, limit)
    }

    /// Feedback counters.
    pub fn get_feedback_stats(&self) -> Result<FeedbackStats> {
        let conn = self.pool.get()?;
        FeedbackRepo::stats(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeedbackType;
    use moltguard_core::{AnalysisTarget, Finding, TargetType, Verdict};
    use tempfile::TempDir;

    fn sample_analysis(blocked: bool) -> NewAnalysis {
        let target = AnalysisTarget::new(
            TargetType::ToolResult,
            "sample tool output for the log",
            "web_fetch",
        );
        NewAnalysis::from_target(&target, &Verdict::clean(1), 50, blocked)
    }

    #[test]
    fn test_ids_are_sequential_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("moltguard.db");

        {
            let db = Database::with_path(&path).unwrap();
            for expected in 1..=3i64 {
                assert_eq!(db.log_analysis(sample_analysis(false)).unwrap(), expected);
            }
        }

        // Reopening the same file must continue the sequence with no gaps
        // or reuse.
        let db = Database::with_path(&path).unwrap();
        assert_eq!(db.log_analysis(sample_analysis(false)).unwrap(), 4);
        assert_eq!(db.log_analysis(sample_analysis(false)).unwrap(), 5);

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.total_analyses, 5);
    }

    #[test]
    fn test_blocked_flag_is_callers_decision() {
        let db = Database::in_memory().unwrap();

        // An injection verdict with blocking disabled by policy: the entry
        // records the detection but never `blocked`.
        let target = AnalysisTarget::new(TargetType::ToolResult, "content", "shell");
        let verdict = Verdict::aggregate(
            vec![Finding {
                chunk_index: 0,
                suspicious_content: "override".to_string(),
                confidence: 0.95,
                category: None,
            }],
            true,
            1,
        );
        let id = db
            .log_analysis(NewAnalysis::from_target(&target, &verdict, 10, false))
            .unwrap();

        let record = db.get_analysis(id).unwrap().unwrap();
        assert!(record.verdict.is_injection);
        assert!(!record.blocked);

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.total_blocked, 0);
    }

    #[test]
    fn test_feedback_without_analysis_id_counts() {
        let db = Database::in_memory().unwrap();

        db.log_feedback(NewFeedback {
            analysis_id: None,
            feedback_type: FeedbackType::MissedDetection,
            reason: "missed an injection in an email".to_string(),
        })
        .unwrap();

        assert_eq!(db.get_feedback_stats().unwrap().missed_detections, 1);
    }

    #[test]
    fn test_recent_detections_only_injections() {
        let db = Database::in_memory().unwrap();
        db.log_analysis(sample_analysis(false)).unwrap();

        let target = AnalysisTarget::new(TargetType::Message, "content", "peer");
        let verdict = Verdict::aggregate(
            vec![Finding {
                chunk_index: 0,
                suspicious_content: "do as I say".to_string(),
                confidence: 0.8,
                category: None,
            }],
            true,
            1,
        );
        db.log_analysis(NewAnalysis::from_target(&target, &verdict, 10, true))
            .unwrap();

        let detections = db.get_recent_detections(10).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].target_type, TargetType::Message);
        assert!(detections[0].blocked);
    }
}
