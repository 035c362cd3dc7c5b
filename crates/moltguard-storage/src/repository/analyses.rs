//! Analysis log repository.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Row};
use sha2::{Digest, Sha256};

use moltguard_core::{TargetType, Verdict};

use crate::error::Result;
use crate::models::{AnalysisRecord, GuardStats, NewAnalysis};

/// Maximum preview length in characters.
const PREVIEW_MAX_LEN: usize = 80;

/// Repository for analysis log operations.
pub struct AnalysesRepo;

impl AnalysesRepo {
    /// Append a new analysis entry. Returns the assigned id.
    pub fn insert(conn: &Connection, new: NewAnalysis) -> Result<i64> {
        let verdict_json = serde_json::to_string(&new.verdict)?;

        conn.execute(
            "INSERT INTO analyses (
                target_type, source_label, content_hash, preview, content_length,
                chunks_analyzed, verdict, is_injection, confidence, duration_ms,
                blocked, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                new.target_type.as_str(),
                new.source_label,
                new.content_hash,
                new.preview,
                new.content_length,
                new.chunks_analyzed,
                verdict_json,
                new.verdict.is_injection as i64,
                new.verdict.confidence,
                new.duration_ms,
                new.blocked as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get an entry by id.
    pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<AnalysisRecord>> {
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_BASE))?;
        let record = stmt.query_row([id], map_row).ok();
        Ok(record)
    }

    /// Get the last `limit` entries, newest first.
    pub fn get_recent(conn: &Connection, limit: i64) -> Result<Vec<AnalysisRecord>> {
        let mut stmt = conn.prepare(&format!("{} ORDER BY id DESC LIMIT ?1", SELECT_BASE))?;
        let records = stmt
            .query_map([limit], map_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// Get the last `limit` entries where the verdict flagged an injection,
    /// newest first.
    pub fn get_recent_detections(conn: &Connection, limit: i64) -> Result<Vec<AnalysisRecord>> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE is_injection = 1 ORDER BY id DESC LIMIT ?1",
            SELECT_BASE
        ))?;
        let records = stmt
            .query_map([limit], map_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// Aggregate statistics over the full log. `blocked_last_24h` uses the
    /// wall clock at query time and is recomputed on every call.
    pub fn stats(conn: &Connection) -> Result<GuardStats> {
        let (total_analyses, total_blocked, avg_duration_ms) = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(blocked), 0),
                COALESCE(AVG(duration_ms), 0.0)
             FROM analyses",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            },
        )?;

        let cutoff = (Utc::now() - Duration::hours(24)).to_rfc3339();
        let blocked_last_24h: i64 = conn.query_row(
            "SELECT COUNT(*) FROM analyses WHERE blocked = 1 AND created_at >= ?1",
            [cutoff],
            |row| row.get(0),
        )?;

        Ok(GuardStats {
            total_analyses,
            total_blocked,
            blocked_last_24h,
            avg_duration_ms: avg_duration_ms.round() as i64,
        })
    }
}

const SELECT_BASE: &str = "SELECT id, target_type, source_label, content_hash, preview, \
     content_length, chunks_analyzed, verdict, duration_ms, blocked, created_at FROM analyses";

fn map_row(row: &Row<'_>) -> rusqlite::Result<AnalysisRecord> {
    let target_type: String = row.get(1)?;
    let verdict_json: String = row.get(7)?;
    let verdict: Verdict = serde_json::from_str(&verdict_json).unwrap_or_else(|_| Verdict::clean(0));

    Ok(AnalysisRecord {
        id: row.get(0)?,
        target_type: TargetType::parse(&target_type).unwrap_or(TargetType::ToolResult),
        source_label: row.get(2)?,
        content_hash: row.get(3)?,
        preview: row.get(4)?,
        content_length: row.get(5)?,
        chunks_analyzed: row.get(6)?,
        verdict,
        duration_ms: row.get(8)?,
        blocked: row.get::<_, i64>(9)? != 0,
        created_at: parse_datetime(&row.get::<_, String>(10)?),
    })
}

/// Hash content with SHA-256 for privacy-preserving storage.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Create a short single-line preview of analyzed content.
pub fn create_preview(content: &str) -> String {
    let cleaned: String = content
        .chars()
        .filter(|c| !c.is_control())
        .take(PREVIEW_MAX_LEN)
        .collect();

    if content.chars().count() > PREVIEW_MAX_LEN {
        format!("{}...", cleaned)
    } else {
        cleaned
    }
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
