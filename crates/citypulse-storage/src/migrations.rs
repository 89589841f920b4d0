//! Database schema migrations.
//!
//! Applies the initial schema: the sessions table and the
//! schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use citypulse_core::error::CityPulseError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), CityPulseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| CityPulseError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| CityPulseError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: sessions");
    }

    Ok(())
}

/// Version 1: one row per session, history stored as a JSON array.
fn apply_v1(conn: &Connection) -> Result<(), CityPulseError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            session_id          TEXT PRIMARY KEY NOT NULL,
            created_at          INTEGER NOT NULL,
            last_activity       INTEGER NOT NULL,
            conversation_json   TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_last_activity
            ON sessions (last_activity);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'sessions');
        ",
    )
    .map_err(|e| CityPulseError::Storage(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}
