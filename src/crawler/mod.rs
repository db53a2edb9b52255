//! Ingestion engine
//!
//! This module contains the core ingestion logic, including:
//! - The cooldown gate shared by concurrent page workers
//! - The bounded-concurrency page crawler
//! - The reverse-chronological window scanner
//! - Overall run coordination and batched persistence

mod batch;
mod cooldown;
mod coordinator;
mod pages;
mod scanner;

pub use cooldown::{CooldownGate, CooldownOutcome, GateState};
pub use coordinator::{Coordinator, IngestRequest, RunReport};
pub use pages::{CrawlSettings, PageCrawler};
pub use scanner::{probe_window, ScanReport, WindowScanner};

use crate::storage::FlushSummary;
use std::fmt;
use std::str::FromStr;

/// How a run walks the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestMode {
    /// Fetch every page of the window concurrently
    Crawl,
    /// Walk pages newest first and stop at the first older entry
    #[default]
    Scan,
}

impl IngestMode {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Crawl => "crawl",
            Self::Scan => "scan",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "crawl" => Some(Self::Crawl),
            "scan" => Some(Self::Scan),
            _ => None,
        }
    }
}

impl FromStr for IngestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_string(&s.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown mode '{}' (expected crawl or scan)", s))
    }
}

impl fmt::Display for IngestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Counters of one ingestion pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestCounts {
    /// Records handed to the repository
    pub records_processed: u64,
    /// Items attached to those records
    pub items_processed: u64,
    /// Entries outside the time bounds
    pub entries_skipped: u64,
    /// What the repository did with the processed records
    pub written: FlushSummary,
}
