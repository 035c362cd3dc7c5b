//! Database schema and migrations.

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < SCHEMA_VERSION {
        info!(
            "Running migrations from version {} to {}",
            current_version, SCHEMA_VERSION
        );

        if current_version < 1 {
            migrate_v1(conn)?;
        }

        set_schema_version(conn, SCHEMA_VERSION)?;
        info!("Migrations complete");
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration to version 1: analysis log and feedback tables.
fn migrate_v1(conn: &Connection) -> Result<()> {
    info!("Applying migration v1: analysis log and feedback");

    // AUTOINCREMENT (not plain rowid) so ids are never reused even after
    // the newest rows are deleted or the process restarts.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS analyses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_type TEXT NOT NULL,
            source_label TEXT,
            content_hash TEXT NOT NULL,
            preview TEXT NOT NULL,
            content_length INTEGER NOT NULL,
            chunks_analyzed INTEGER NOT NULL,
            verdict TEXT NOT NULL,
            is_injection INTEGER NOT NULL,
            confidence REAL NOT NULL,
            duration_ms INTEGER NOT NULL,
            blocked INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_analyses_created_at ON analyses (created_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_analyses_is_injection ON analyses (is_injection)",
        [],
    )?;

    // analysis_id is intentionally not a foreign key: feedback may arrive
    // after older log rows are pruned, and missed-detection reports have no
    // analysis at all.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS feedback (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            analysis_id INTEGER,
            feedback_type TEXT NOT NULL,
            reason TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}
