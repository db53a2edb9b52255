use crate::model::{Modality, PageSize};
use crate::RecordResult;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for pncp-ingest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    pub output: OutputConfig,
}

/// Upstream registry endpoints and request parameters
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the query API (update feed)
    #[serde(rename = "consulta-url", default = "default_consulta_url")]
    pub consulta_url: String,

    /// Base URL of the integration API (record items)
    #[serde(rename = "pncp-url", default = "default_pncp_url")]
    pub pncp_url: String,

    /// Per-request timeout in seconds
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Entries per feed page (10 or 50)
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,

    /// Default modality code when the CLI does not override it
    #[serde(default = "default_modality")]
    pub modality: i64,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn page_size(&self) -> RecordResult<PageSize> {
        PageSize::try_from(self.page_size)
    }

    pub fn modality(&self) -> RecordResult<Modality> {
        Modality::from_code(self.modality)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            consulta_url: default_consulta_url(),
            pncp_url: default_pncp_url(),
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            modality: default_modality(),
            user_agent: default_user_agent(),
        }
    }
}

/// Per-call retry behavior of the registry client
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Page crawler behavior
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of pages fetched at once
    #[serde(rename = "max-concurrent-pages", default = "default_max_concurrent_pages")]
    pub max_concurrent_pages: usize,

    /// How long every worker pauses after the upstream starts failing
    #[serde(rename = "cooldown-secs", default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Failed attempts tolerated per page before the crawl aborts
    #[serde(rename = "max-page-retries", default = "default_max_page_retries")]
    pub max_page_retries: u32,
}

impl CrawlerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_pages: default_max_concurrent_pages(),
            cooldown_secs: default_cooldown_secs(),
            max_page_retries: default_max_page_retries(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Saves buffered between flushes
    #[serde(rename = "flush-every", default = "default_flush_every")]
    pub flush_every: usize,
}

fn default_consulta_url() -> String {
    "https://pncp.gov.br/api/consulta".to_string()
}

fn default_pncp_url() -> String {
    "https://pncp.gov.br/api/pncp".to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_page_size() -> u32 {
    50
}

fn default_modality() -> i64 {
    6
}

fn default_user_agent() -> String {
    format!("pncp-ingest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    4000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_max_concurrent_pages() -> usize {
    20
}

fn default_cooldown_secs() -> u64 {
    180
}

fn default_max_page_retries() -> u32 {
    5
}

fn default_flush_every() -> usize {
    100
}
