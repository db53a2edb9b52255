//! Storage module for persisting ingested records
//!
//! This module handles all database operations for the ingestion engine, including:
//! - SQLite database initialization and schema management
//! - Buffered, staleness-guarded record upserts
//! - Run tracking

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::crawler::IngestMode;
use crate::model::IngestionWindow;
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Parameters of a run being started
#[derive(Debug, Clone)]
pub struct NewRun {
    pub config_hash: String,
    pub mode: IngestMode,
    pub modality: u8,
    pub window: IngestionWindow,
}

/// Counters stored when a run finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub records_processed: u64,
    pub items_processed: u64,
}

/// Represents an ingestion run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub mode: IngestMode,
    pub modality: u8,
    pub window_start: String,
    pub window_end: String,
    pub status: RunStatus,
    pub records_processed: u64,
    pub items_processed: u64,
    pub error_message: Option<String>,
}

/// Status of an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Outcome of writing the queued records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Records that were not stored before
    pub inserted: u64,
    /// Stored records replaced by strictly newer data
    pub updated: u64,
    /// Records dropped because the stored or queued copy was at least as new
    pub skipped: u64,
}

impl FlushSummary {
    pub fn written(&self) -> u64 {
        self.inserted + self.updated
    }

    pub fn absorb(&mut self, other: FlushSummary) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
    }
}
