//! Configuration module for pncp-ingest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Only `[output]` is required; the registry, retry and crawler sections fall
//! back to the production defaults.
//!
//! # Example
//!
//! ```no_run
//! use pncp_ingest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("ingest.toml")).unwrap();
//! println!("Pages in flight: {}", config.crawler.max_concurrent_pages);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, CrawlerConfig, OutputConfig, RegistryConfig, RetryConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
