//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::crawler::IngestMode;
use crate::model::{
    parse_feed_timestamp, ControlNumber, ProcurementRecord, RawEntry, RawItem, UPDATED_AT_FIELD,
};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{FlushSummary, NewRun, RunCounts, RunRecord, RunStatus};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

const RUN_COLUMNS: &str = "id, started_at, finished_at, config_hash, mode, modality, \
     window_start, window_end, status, records_processed, items_processed, error_message";

/// A record waiting for the next flush
#[derive(Debug)]
struct PendingWrite {
    record: ProcurementRecord,
    force: bool,
}

/// What a single flushed record did to the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOutcome {
    Inserted,
    Updated,
    Skipped,
}

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
    pending: Vec<PendingWrite>,
    pending_index: HashMap<ControlNumber, usize>,
    /// Saves dropped in the queue, reported as skipped by the next flush
    dropped: u64,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self::with_connection(conn))
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn,
            pending: Vec::new(),
            pending_index: HashMap::new(),
            dropped: 0,
        }
    }

    fn enqueue(&mut self, record: ProcurementRecord, force: bool) {
        if let Some(&slot) = self.pending_index.get(record.key()) {
            let queued = &mut self.pending[slot];
            // A queued forced write only yields to another forced write.
            let keep_queued = !force
                && (queued.force || queued.record.updated_at() >= record.updated_at());
            if keep_queued {
                debug!("Dropping queued duplicate of {}", record.key());
                self.dropped += 1;
                return;
            }
            self.dropped += 1;
            *queued = PendingWrite { record, force };
            return;
        }

        self.pending_index
            .insert(record.key().clone(), self.pending.len());
        self.pending.push(PendingWrite { record, force });
    }

    fn begin_if_needed(&self) -> StorageResult<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
        }
        Ok(())
    }

    /// Timestamp stored in the payload of an existing record
    ///
    /// `None` if the record does not exist; `Some(None)` if it exists but has
    /// no usable timestamp.
    fn stored_timestamp(
        &self,
        control_number: &ControlNumber,
    ) -> StorageResult<Option<Option<chrono::NaiveDateTime>>> {
        let stored: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT CAST(json_extract(payload, ?2) AS TEXT) FROM records WHERE control_number = ?1",
                params![control_number.as_str(), format!("$.{}", UPDATED_AT_FIELD)],
                |row| row.get(0),
            )
            .optional()?;

        Ok(stored.map(|value| value.and_then(|s| parse_feed_timestamp(&s).ok())))
    }

    fn write_record(&self, record: &ProcurementRecord, force: bool) -> StorageResult<WriteOutcome> {
        let key = record.key();
        let stored = self.stored_timestamp(key)?;

        if let Some(Some(existing)) = stored {
            if !force && existing >= record.updated_at() {
                debug!(
                    "Skipping {}: stored {} is not older than {}",
                    key,
                    existing,
                    record.updated_at()
                );
                return Ok(WriteOutcome::Skipped);
            }
        }

        let payload = to_json(&record.entry.payload)?;
        let updated_at = record
            .updated_at()
            .format("%Y-%m-%dT%H:%M:%S%.f")
            .to_string();
        let now = Utc::now().to_rfc3339();

        let outcome = if stored.is_none() {
            self.conn.execute(
                "INSERT INTO records
                 (control_number, cnpj, year, sequence, updated_at, payload, first_seen_at, last_written_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    key.as_str(),
                    key.cnpj(),
                    key.year(),
                    key.sequence(),
                    updated_at,
                    payload,
                    now
                ],
            )?;
            WriteOutcome::Inserted
        } else {
            self.conn.execute(
                "UPDATE records SET updated_at = ?2, payload = ?3, last_written_at = ?4
                 WHERE control_number = ?1",
                params![key.as_str(), updated_at, payload, now],
            )?;
            self.conn.execute(
                "DELETE FROM record_items WHERE control_number = ?1",
                params![key.as_str()],
            )?;
            WriteOutcome::Updated
        };

        let mut stmt = self.conn.prepare_cached(
            "INSERT OR REPLACE INTO record_items (control_number, item_number, payload)
             VALUES (?1, ?2, ?3)",
        )?;
        for item in &record.items {
            stmt.execute(params![key.as_str(), item.item_number, to_json(&item.payload)?])?;
        }

        Ok(outcome)
    }
}

fn to_json(payload: &Map<String, Value>) -> StorageResult<String> {
    serde_json::to_string(payload).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn from_json(raw: &str) -> StorageResult<Value> {
    serde_json::from_str(raw).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        mode: IngestMode::from_db_string(&row.get::<_, String>(4)?).unwrap_or(IngestMode::Scan),
        modality: row.get(5)?,
        window_start: row.get(6)?,
        window_end: row.get(7)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(8)?)
            .unwrap_or(RunStatus::Failed),
        records_processed: row.get::<_, i64>(9)? as u64,
        items_processed: row.get::<_, i64>(10)? as u64,
        error_message: row.get(11)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, run: &NewRun) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, mode, modality, window_start, window_end, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                now,
                run.config_hash,
                run.mode.to_db_string(),
                run.modality,
                run.window.start().to_string(),
                run.window.end().to_string(),
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        counts: RunCounts,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, records_processed = ?3,
             items_processed = ?4, error_message = ?5
             WHERE id = ?6",
            params![
                status.to_db_string(),
                now,
                counts.records_processed as i64,
                counts.items_processed as i64,
                error_message,
                run_id
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                &format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS),
                [],
                run_from_row,
            )
            .optional()?;

        Ok(run)
    }

    // ===== Record Persistence =====

    fn save(&mut self, record: ProcurementRecord) -> StorageResult<()> {
        self.enqueue(record, false);
        Ok(())
    }

    fn force_save(&mut self, record: ProcurementRecord) -> StorageResult<()> {
        self.enqueue(record, true);
        Ok(())
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }

    fn flush(&mut self) -> StorageResult<FlushSummary> {
        let mut summary = FlushSummary {
            skipped: std::mem::take(&mut self.dropped),
            ..FlushSummary::default()
        };
        if self.pending.is_empty() {
            return Ok(summary);
        }

        self.begin_if_needed()?;

        let pending = std::mem::take(&mut self.pending);
        self.pending_index.clear();

        for write in &pending {
            match self.write_record(&write.record, write.force)? {
                WriteOutcome::Inserted => summary.inserted += 1,
                WriteOutcome::Updated => summary.updated += 1,
                WriteOutcome::Skipped => summary.skipped += 1,
            }
        }

        debug!(
            "Flushed {} records ({} inserted, {} updated, {} skipped)",
            pending.len(),
            summary.inserted,
            summary.updated,
            summary.skipped
        );
        Ok(summary)
    }

    fn commit(&mut self) -> StorageResult<FlushSummary> {
        let summary = self.flush()?;
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(summary)
    }

    fn rollback(&mut self) -> StorageResult<()> {
        self.pending.clear();
        self.pending_index.clear();
        self.dropped = 0;
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn get_record(
        &self,
        control_number: &ControlNumber,
    ) -> StorageResult<Option<ProcurementRecord>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM records WHERE control_number = ?1",
                params![control_number.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };
        let entry = RawEntry::from_json(from_json(&payload)?)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut stmt = self.conn.prepare(
            "SELECT payload FROM record_items WHERE control_number = ?1 ORDER BY item_number",
        )?;
        let raw_items = stmt
            .query_map(params![control_number.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let items = raw_items
            .iter()
            .map(|raw| {
                RawItem::from_json(control_number, from_json(raw)?)
                    .map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(Some(ProcurementRecord::new(entry, items)))
    }

    // ===== Statistics =====

    fn count_records(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_items(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM record_items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_runs_by_status(&self, status: RunStatus) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn newest_update(&self) -> StorageResult<Option<String>> {
        let newest: Option<String> =
            self.conn
                .query_row("SELECT MAX(updated_at) FROM records", [], |row| row.get(0))?;
        Ok(newest)
    }
}
