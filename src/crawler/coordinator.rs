//! Run coordinator - the single boundary between the engine and its callers
//!
//! The coordinator:
//! - Records every run in the run ledger
//! - Drives either the page crawler or the window scanner
//! - Batches persistence and rolls back on failure
//! - Turns the outcome into a [`RunReport`]

use crate::config::Config;
use crate::crawler::batch::BatchWriter;
use crate::crawler::{
    probe_window, CrawlSettings, IngestCounts, IngestMode, PageCrawler, WindowScanner,
};
use crate::model::{
    IngestionWindow, Modality, PageResult, ProcurementRecord, TimeBounds, WindowPosition,
};
use crate::registry::{HttpRegistryClient, RegistryClient};
use crate::storage::{open_storage, NewRun, RunCounts, RunStatus, SqliteStorage, Storage};
use crate::{IngestError, Result};
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What to ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestRequest {
    pub mode: IngestMode,
    pub modality: Modality,
    pub window: IngestionWindow,
    pub bounds: TimeBounds,
}

impl IngestRequest {
    /// Ingests whole days of `window`
    pub fn new(mode: IngestMode, modality: Modality, window: IngestionWindow) -> Self {
        Self {
            mode,
            modality,
            window,
            bounds: window.full_bounds(),
        }
    }

    /// Ingests only records updated within `bounds`
    pub fn with_bounds(mode: IngestMode, modality: Modality, bounds: TimeBounds) -> Self {
        Self {
            mode,
            modality,
            window: bounds.covering_window(),
            bounds,
        }
    }
}

/// Caller-facing result of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub message: String,
    pub records_processed: u64,
    pub items_processed: u64,
    pub errors: Vec<String>,
    pub elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
}

impl RunReport {
    fn success(counts: &IngestCounts, elapsed: Duration, run_id: i64) -> Self {
        Self {
            success: true,
            message: format!(
                "Processed {} records ({} items, {} written, {} unchanged) in {:.1}s",
                counts.records_processed,
                counts.items_processed,
                counts.written.written(),
                counts.written.skipped,
                elapsed.as_secs_f64()
            ),
            records_processed: counts.records_processed,
            items_processed: counts.items_processed,
            errors: Vec::new(),
            elapsed_seconds: elapsed.as_secs_f64(),
            run_id: Some(run_id),
        }
    }

    fn failure(err: &IngestError, elapsed: Duration, run_id: Option<i64>) -> Self {
        let message = match err {
            IngestError::Cancelled => "Ingestion cancelled",
            _ => "Ingestion failed",
        };
        Self {
            success: false,
            message: message.to_string(),
            records_processed: 0,
            items_processed: 0,
            errors: error_chain(err),
            elapsed_seconds: elapsed.as_secs_f64(),
            run_id,
        }
    }
}

/// Top-level message followed by each underlying cause
fn error_chain(err: &dyn std::error::Error) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    chain
}

/// Main ingestion coordinator
pub struct Coordinator<C, S> {
    config: Config,
    client: Arc<C>,
    storage: S,
    config_hash: String,
    cancel: CancellationToken,
}

impl Coordinator<HttpRegistryClient, SqliteStorage> {
    /// Builds a coordinator talking to the real registry and database
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `config_hash` - Hash of the configuration file, stored with each run
    pub fn from_config(config: Config, config_hash: String) -> Result<Self> {
        let client = HttpRegistryClient::new(&config.registry, &config.retry)?;
        let storage = open_storage(Path::new(&config.output.database_path))?;
        Ok(Self::new(config, Arc::new(client), storage, config_hash))
    }
}

impl<C: RegistryClient + 'static, S: Storage> Coordinator<C, S> {
    pub fn new(config: Config, client: Arc<C>, storage: S, config_hash: String) -> Self {
        Self {
            config,
            client,
            storage,
            config_hash,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that cancels whatever run is in progress
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Modality configured for runs that do not name one
    pub fn default_modality(&self) -> Result<Modality> {
        Ok(self.config.registry.modality()?)
    }

    /// Fetches page 1 of `window` without persisting anything
    pub async fn probe(&self, window: IngestionWindow, modality: Modality) -> Result<PageResult> {
        let page_size = self.config.registry.page_size()?;
        probe_window(self.client.as_ref(), window, modality, page_size).await
    }

    /// Runs one ingestion and records it in the run ledger
    ///
    /// Never fails: every error is rolled back, recorded against the run
    /// and reported in [`RunReport::errors`].
    pub async fn run(&mut self, request: &IngestRequest) -> RunReport {
        let started = Instant::now();
        let new_run = NewRun {
            config_hash: self.config_hash.clone(),
            mode: request.mode,
            modality: request.modality.code(),
            window: request.window,
        };

        let run_id = match self.storage.create_run(&new_run) {
            Ok(id) => id,
            Err(e) => {
                let err = IngestError::from(e);
                error!("Could not start run: {}", err);
                return RunReport::failure(&err, started.elapsed(), None);
            }
        };
        info!(
            "Run {} started: {} of {} for modality {:?}",
            run_id, request.mode, request.window, request.modality
        );

        let outcome = self.ingest(request).await;
        let elapsed = started.elapsed();

        let (status, counts, message) = match &outcome {
            Ok(counts) => (RunStatus::Completed, *counts, None),
            Err(IngestError::Cancelled) => (
                RunStatus::Cancelled,
                IngestCounts::default(),
                Some(IngestError::Cancelled.to_string()),
            ),
            Err(e) => (RunStatus::Failed, IngestCounts::default(), Some(e.to_string())),
        };
        let run_counts = RunCounts {
            records_processed: counts.records_processed,
            items_processed: counts.items_processed,
        };
        if let Err(e) = self
            .storage
            .finish_run(run_id, status, run_counts, message.as_deref())
        {
            warn!("Failed to record status of run {}: {}", run_id, e);
        }

        match outcome {
            Ok(counts) => {
                info!(
                    "Run {} completed: {} records in {:?}",
                    run_id, counts.records_processed, elapsed
                );
                RunReport::success(&counts, elapsed, run_id)
            }
            Err(e) => {
                error!("Run {} {}: {}", run_id, status.to_db_string(), e);
                RunReport::failure(&e, elapsed, Some(run_id))
            }
        }
    }

    /// Ingests one request without touching the run ledger
    ///
    /// Commits once on success; on error the uncommitted batch has been
    /// rolled back when this returns.
    pub async fn ingest(&mut self, request: &IngestRequest) -> Result<IngestCounts> {
        match request.mode {
            IngestMode::Scan => {
                let scanner = WindowScanner::new(
                    self.client.clone(),
                    request.modality,
                    self.config.registry.page_size()?,
                    self.config.output.flush_every,
                    self.cancel.clone(),
                );
                let report = scanner
                    .run(request.window, request.bounds, &mut self.storage)
                    .await?;
                Ok(report.counts)
            }
            IngestMode::Crawl => self.crawl(request).await,
        }
    }

    async fn crawl(&mut self, request: &IngestRequest) -> Result<IngestCounts> {
        let settings = CrawlSettings::from_config(&self.config, request.modality)?;
        let crawler = PageCrawler::new(self.client.clone(), settings, self.cancel.clone());
        let mut records = crawler.crawl(request.window);

        let mut writer = BatchWriter::new(&mut self.storage, self.config.output.flush_every);
        match drain(&mut records, &mut writer, request.bounds).await {
            Ok(()) => Ok(writer.commit()?),
            Err(e) => {
                // Stop outstanding page tasks before discarding the batch.
                drop(records);
                writer.rollback();
                Err(e)
            }
        }
    }
}

/// Saves every streamed record that falls inside `bounds`
async fn drain<S: Storage + ?Sized>(
    records: &mut BoxStream<'static, Result<ProcurementRecord>>,
    writer: &mut BatchWriter<'_, S>,
    bounds: TimeBounds,
) -> Result<()> {
    while let Some(record) = records.next().await {
        let record = record?;
        match bounds.position(record.updated_at()) {
            WindowPosition::Within => writer.save(record)?,
            WindowPosition::Before | WindowPosition::After => writer.skip(),
        }
    }
    Ok(())
}
