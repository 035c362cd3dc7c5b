//! Feedback repository.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::models::{FeedbackRecord, FeedbackStats, FeedbackType, NewFeedback};

/// Repository for user feedback operations.
pub struct FeedbackRepo;

impl FeedbackRepo {
    /// Append a feedback entry. The referenced analysis id, when present,
    /// is not required to exist.
    pub fn insert(conn: &Connection, new: NewFeedback) -> Result<i64> {
        conn.execute(
            "INSERT INTO feedback (analysis_id, feedback_type, reason, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                new.analysis_id,
                new.feedback_type.as_str(),
                new.reason,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get the last `limit` feedback entries, newest first.
    pub fn get_recent(conn: &Connection, limit: i64) -> Result<Vec<FeedbackRecord>> {
        let mut stmt = conn.prepare(
            "SELECT id, analysis_id, feedback_type, reason, created_at
             FROM feedback ORDER BY id DESC LIMIT ?1",
        )?;

        let records = stmt
            .query_map([limit], map_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }

    /// Counts per feedback type.
    pub fn stats(conn: &Connection) -> Result<FeedbackStats> {
        let count = |feedback_type: FeedbackType| -> Result<i64> {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM feedback WHERE feedback_type = ?1",
                [feedback_type.as_str()],
                |row| row.get(0),
            )?;
            Ok(n)
        };

        Ok(FeedbackStats {
            false_positives: count(FeedbackType::FalsePositive)?,
            missed_detections: count(FeedbackType::MissedDetection)?,
        })
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<FeedbackRecord> {
    let feedback_type: String = row.get(2)?;

    Ok(FeedbackRecord {
        id: row.get(0)?,
        analysis_id: row.get(1)?,
        feedback_type: FeedbackType::parse(&feedback_type).unwrap_or(FeedbackType::FalsePositive),
        reason: row.get(3)?,
        created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(4)?)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_false_positive_links_to_analysis() {
        let conn = setup_db();
        FeedbackRepo::insert(
            &conn,
            NewFeedback {
                analysis_id: Some(7),
                feedback_type: FeedbackType::FalsePositive,
                reason: "that was documentation".to_string(),
            },
        )
        .unwrap();

        let records = FeedbackRepo::get_recent(&conn, 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].analysis_id, Some(7));
        assert_eq!(records[0].feedback_type, FeedbackType::FalsePositive);
    }

    #[test]
    fn test_missed_detection_needs_no_analysis_id() {
        let conn = setup_db();
        FeedbackRepo::insert(
            &conn,
            NewFeedback {
                analysis_id: None,
                feedback_type: FeedbackType::MissedDetection,
                reason: "the calendar invite was an injection".to_string(),
            },
        )
        .unwrap();

        let stats = FeedbackRepo::stats(&conn).unwrap();
        assert_eq!(stats.missed_detections, 1);
        assert_eq!(stats.false_positives, 0);

        let records = FeedbackRepo::get_recent(&conn, 10).unwrap();
        assert!(records[0].analysis_id.is_none());
    }

    #[test]
    fn test_stats_counts_both_types() {
        let conn = setup_db();
        for _ in 0..3 {
            FeedbackRepo::insert(
                &conn,
                NewFeedback {
                    analysis_id: Some(1),
                    feedback_type: FeedbackType::FalsePositive,
                    reason: "fp".to_string(),
                },
            )
            .unwrap();
        }
        FeedbackRepo::insert(
            &conn,
            NewFeedback {
                analysis_id: None,
                feedback_type: FeedbackType::MissedDetection,
                reason: "missed".to_string(),
            },
        )
        .unwrap();

        let stats = FeedbackRepo::stats(&conn).unwrap();
        assert_eq!(stats.false_positives, 3);
        assert_eq!(stats.missed_detections, 1);
    }
}
