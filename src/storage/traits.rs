//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::model::{ControlNumber, ProcurementRecord};
use crate::storage::{FlushSummary, NewRun, RunCounts, RunRecord, RunStatus};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Record writes are buffered: `save` only queues, `flush` writes the queue
/// inside an open transaction, `commit` makes everything durable and
/// `rollback` discards whatever has not been committed yet.
pub trait Storage {
    // ===== Run Management =====

    /// Records the start of an ingestion run
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, run: &NewRun) -> StorageResult<i64>;

    /// Stores the final status and counters of a run
    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        counts: RunCounts,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    // ===== Record Persistence =====

    /// Queues a record; at flush it is written only if strictly newer than
    /// the stored copy
    fn save(&mut self, record: ProcurementRecord) -> StorageResult<()>;

    /// Queues a record that overwrites the stored copy regardless of age
    fn force_save(&mut self, record: ProcurementRecord) -> StorageResult<()>;

    /// Number of queued records not yet flushed
    fn pending(&self) -> usize;

    /// Writes queued records into the open transaction without committing
    fn flush(&mut self) -> StorageResult<FlushSummary>;

    /// Flushes, then commits the open transaction
    fn commit(&mut self) -> StorageResult<FlushSummary>;

    /// Drops queued records and rolls back the open transaction
    fn rollback(&mut self) -> StorageResult<()>;

    /// Reads back a stored record with its items
    fn get_record(&self, control_number: &ControlNumber)
        -> StorageResult<Option<ProcurementRecord>>;

    // ===== Statistics =====

    /// Counts stored records
    fn count_records(&self) -> StorageResult<u64>;

    /// Counts stored items across all records
    fn count_items(&self) -> StorageResult<u64>;

    /// Counts runs in a given status
    fn count_runs_by_status(&self, status: RunStatus) -> StorageResult<u64>;

    /// Latest `dataAtualizacaoGlobal` among stored records
    fn newest_update(&self) -> StorageResult<Option<String>>;
}
