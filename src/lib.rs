//! PNCP-Ingest: incremental ingestion of public-procurement records
//!
//! This crate pulls procurement records ("contratações") from the PNCP
//! registry's update feed into a local SQLite store. The feed is paginated,
//! rate limited and only windowed by whole days, so the crate provides:
//!
//! - a bounded-concurrency page crawler coordinated by a shared cooldown gate
//! - a reverse-chronological window scanner that stops as soon as records
//!   fall before the requested window
//! - a staleness-guarded repository that only overwrites strictly newer data

pub mod config;
pub mod crawler;
pub mod model;
pub mod output;
pub mod registry;
pub mod storage;

use thiserror::Error;

/// Main error type for ingestion operations
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] registry::RegistryError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Page {page} failed after {attempts} attempts: {source}")]
    PageRetriesExhausted {
        page: u32,
        attempts: u32,
        source: registry::RegistryError,
    },

    #[error(
        "Feed ordering violated on page {page} at entry {index}: {current} is newer than {previous}"
    )]
    OrderViolation {
        page: u32,
        index: usize,
        previous: chrono::NaiveDateTime,
        current: chrono::NaiveDateTime,
    },

    #[error("Invalid ingestion window: {0}")]
    InvalidWindow(String),

    #[error("Ingestion run was cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    Task(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Errors raised while interpreting registry payloads
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("Invalid control number: {0}")]
    InvalidControlNumber(String),

    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid timestamp in '{field}': {value}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("Invalid modality code: {0}")]
    InvalidModality(i64),

    #[error("Invalid page size: {0} (expected 10 or 50)")]
    InvalidPageSize(u32),

    #[error("Invalid date: {0}")]
    InvalidDate(String),
}

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for payload parsing
pub type RecordResult<T> = std::result::Result<T, RecordError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, IngestMode, RunReport};
pub use model::{ControlNumber, IngestionWindow, Modality, ProcurementRecord, TimeBounds};
