//! Statistics generation from the ingestion database
//!
//! This module provides functionality for extracting and displaying
//! statistics about stored records and the run ledger.

use crate::storage::{RunRecord, RunStatus, Storage};
use crate::Result;

/// Ingestion statistics summary
#[derive(Debug, Clone)]
pub struct IngestStatistics {
    /// Total number of stored records
    pub total_records: u64,

    /// Total number of stored items
    pub total_items: u64,

    /// Count of runs by status, in ledger order of statuses
    pub runs_by_status: Vec<(RunStatus, u64)>,

    /// Most recently started run
    pub latest_run: Option<RunRecord>,

    /// Newest `dataAtualizacaoGlobal` among stored records
    pub newest_update: Option<String>,
}

impl IngestStatistics {
    pub fn total_runs(&self) -> u64 {
        self.runs_by_status.iter().map(|(_, count)| count).sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(IngestStatistics)` - Successfully loaded statistics
/// * `Err(IngestError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<IngestStatistics> {
    let total_records = storage.count_records()?;
    let total_items = storage.count_items()?;

    let mut runs_by_status = Vec::new();
    for status in [
        RunStatus::Running,
        RunStatus::Completed,
        RunStatus::Failed,
        RunStatus::Cancelled,
    ] {
        let count = storage.count_runs_by_status(status)?;
        if count > 0 {
            runs_by_status.push((status, count));
        }
    }

    Ok(IngestStatistics {
        total_records,
        total_items,
        runs_by_status,
        latest_run: storage.get_latest_run()?,
        newest_update: storage.newest_update()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &IngestStatistics) {
    println!("=== Ingestion Statistics ===\n");

    println!("Overview:");
    println!("  Stored records: {}", stats.total_records);
    println!("  Stored items: {}", stats.total_items);
    match &stats.newest_update {
        Some(at) => println!("  Newest update: {}", at),
        None => println!("  Newest update: -"),
    }
    println!();

    println!("Runs ({}):", stats.total_runs());
    for (status, count) in &stats.runs_by_status {
        println!("  {}: {}", status.to_db_string(), count);
    }
    println!();

    if let Some(run) = &stats.latest_run {
        println!("Latest Run (#{}):", run.id);
        println!("  Mode: {} (modality {})", run.mode, run.modality);
        println!("  Window: {}..{}", run.window_start, run.window_end);
        println!("  Status: {}", run.status.to_db_string());
        println!("  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            println!("  Finished: {}", finished);
        }
        println!(
            "  Processed: {} records, {} items",
            run.records_processed, run.items_processed
        );
        if let Some(message) = &run.error_message {
            println!("  Error: {}", message);
        }
    }
}
