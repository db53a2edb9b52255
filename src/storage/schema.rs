//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the pncp-ingest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track ingestion runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    mode TEXT NOT NULL,
    modality INTEGER NOT NULL,
    window_start TEXT NOT NULL,
    window_end TEXT NOT NULL,
    status TEXT NOT NULL,
    records_processed INTEGER NOT NULL DEFAULT 0,
    items_processed INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);

-- One row per procurement record, keyed by its control number
CREATE TABLE IF NOT EXISTS records (
    control_number TEXT PRIMARY KEY,
    cnpj TEXT NOT NULL,
    year INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    payload TEXT NOT NULL,
    first_seen_at TEXT NOT NULL,
    last_written_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_updated_at ON records(updated_at);
CREATE INDEX IF NOT EXISTS idx_records_cnpj ON records(cnpj);

-- Line items, replaced as a set whenever their record is rewritten
CREATE TABLE IF NOT EXISTS record_items (
    control_number TEXT NOT NULL REFERENCES records(control_number) ON DELETE CASCADE,
    item_number INTEGER NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (control_number, item_number)
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
