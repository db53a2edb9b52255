//! Output module for reporting on the local store
//!
//! This module handles:
//! - Loading statistics about stored records and past runs
//! - Printing them for the `--stats` command

pub mod stats;

pub use stats::{load_statistics, print_statistics, IngestStatistics};
