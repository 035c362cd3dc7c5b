//! MoltGuard Storage - SQLite persistence layer.
//!
//! Durable, append-only record of every analysis and every feedback report:
//!
//! - Analysis log (privacy-preserving: stores a content hash and a short
//!   preview, never the full content)
//! - User feedback (false positives, missed detections)
//! - Aggregate statistics for the operational status surface
//!
//! Ids are assigned by SQLite under a single-writer connection and are
//! strictly increasing, never reused, including across process restarts.
//!
//! # Example
//!
//! ```no_run
//! use moltguard_core::{AnalysisTarget, TargetType, Verdict};
//! use moltguard_storage::{Database, NewAnalysis};
//!
//! let db = Database::in_memory().unwrap();
//!
//! let target = AnalysisTarget::new(TargetType::ToolResult, "tool output", "web_fetch");
//! let verdict = Verdict::clean(1);
//! let id = db
//!     .log_analysis(NewAnalysis::from_target(&target, &verdict, 42, false))
//!     .unwrap();
//! assert_eq!(id, 1);
//! ```

mod database;
pub mod error;
pub mod models;
mod pool;
pub mod repository;
mod schema;

pub use database::Database;
pub use error::{Result, StorageError};
pub use models::{
    AnalysisRecord, FeedbackRecord, FeedbackStats, FeedbackType, GuardStats, NewAnalysis,
    NewFeedback,
};
pub use pool::ConnectionPool;
pub use repository::{create_preview, hash_content, AnalysesRepo, FeedbackRepo};
