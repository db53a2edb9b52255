//! Bounded-concurrency page crawler
//!
//! Fetches every page of a window concurrently, enriches each entry with its
//! items, and yields the finished records in completion order.
//!
//! # Flow
//!
//! 1. Probe page 1 to learn how many pages the window has
//! 2. Spawn one task per page; tasks are admitted by a semaphore
//! 3. Each task waits for the [`CooldownGate`], fetches its page, then the
//!    items of every entry. Transient failures send the task through the
//!    gate and retry the whole page
//! 4. The first fatal error closes the semaphore so queued pages never
//!    start; running tasks finish and the error is yielded last

use crate::config::Config;
use crate::crawler::cooldown::CooldownGate;
use crate::model::{IngestionWindow, Modality, PageRequest, PageResult, PageSize, ProcurementRecord};
use crate::registry::{RegistryClient, RegistryError};
use crate::{IngestError, Result};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Knobs of one crawl
#[derive(Debug, Clone, Copy)]
pub struct CrawlSettings {
    pub modality: Modality,
    pub page_size: PageSize,
    pub max_concurrent_pages: usize,
    pub max_page_retries: u32,
    pub cooldown: Duration,
}

impl CrawlSettings {
    pub fn from_config(config: &Config, modality: Modality) -> Result<Self> {
        Ok(Self {
            modality,
            page_size: config.registry.page_size()?,
            max_concurrent_pages: config.crawler.max_concurrent_pages,
            max_page_retries: config.crawler.max_page_retries,
            cooldown: config.crawler.cooldown(),
        })
    }
}

/// State shared by the page tasks of one crawl
struct PageContext<C> {
    client: Arc<C>,
    gate: Arc<CooldownGate>,
    max_page_retries: u32,
    cancel: CancellationToken,
}

/// Crawls all pages of a window; one instance per crawl
pub struct PageCrawler<C> {
    client: Arc<C>,
    settings: CrawlSettings,
    gate: Arc<CooldownGate>,
    cancel: CancellationToken,
}

impl<C: RegistryClient + 'static> PageCrawler<C> {
    pub fn new(client: Arc<C>, settings: CrawlSettings, cancel: CancellationToken) -> Self {
        Self {
            client,
            gate: Arc::new(CooldownGate::new(settings.cooldown)),
            settings,
            cancel,
        }
    }

    /// The gate shared by this crawl's workers
    pub fn gate(&self) -> Arc<CooldownGate> {
        self.gate.clone()
    }

    /// Starts the crawl and returns its records as they complete
    ///
    /// The stream ends after the last record, or right after the first
    /// fatal error. Dropping it aborts all outstanding page tasks.
    pub fn crawl(self, window: IngestionWindow) -> BoxStream<'static, Result<ProcurementRecord>> {
        let (tx, rx) = mpsc::channel(self.settings.max_concurrent_pages.max(1) * 2);
        let producer = AbortOnDrop(tokio::spawn(async move {
            if let Err(e) = self.run_pages(window, &tx).await {
                let _ = tx.send(Err(e)).await;
            }
        }));

        stream::unfold((rx, producer), |(mut rx, producer)| async move {
            let item = rx.recv().await?;
            Some((item, (rx, producer)))
        })
        .boxed()
    }

    async fn run_pages(
        self,
        window: IngestionWindow,
        tx: &mpsc::Sender<Result<ProcurementRecord>>,
    ) -> Result<()> {
        let request = PageRequest::first(window, self.settings.modality, self.settings.page_size);

        let first = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(IngestError::Cancelled),
            page = self.client.fetch_page(&request) => page?,
        };
        let total_pages = first.total_pages;
        if total_pages == 0 || first.is_empty {
            info!("Window {} has no records", window);
            return Ok(());
        }
        info!(
            "Crawling {} pages ({} records) for window {}",
            total_pages, first.total_records, window
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_pages.max(1)));
        let context = Arc::new(PageContext {
            client: self.client.clone(),
            gate: self.gate.clone(),
            max_page_retries: self.settings.max_page_retries,
            cancel: self.cancel.clone(),
        });

        let mut tasks = JoinSet::new();
        let mut first = Some(first);
        for page_number in 1..=total_pages {
            let prefetched = if page_number == 1 { first.take() } else { None };
            tasks.spawn(crawl_page(
                context.clone(),
                semaphore.clone(),
                request.page(page_number),
                prefetched,
            ));
        }

        let mut failure: Option<IngestError> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| IngestError::Task(e.to_string()))
                .and_then(|result| result);

            match outcome {
                Ok(Some(records)) => {
                    for record in records {
                        if tx.send(Ok(record)).await.is_err() {
                            debug!("Record stream dropped, stopping crawl");
                            return Ok(());
                        }
                    }
                }
                Ok(None) => {}
                Err(e) if failure.is_none() => {
                    error!("Crawl aborted: {}", e);
                    semaphore.close();
                    failure = Some(e);
                }
                Err(e) => debug!("Additional page failure after abort: {}", e),
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// One page task
///
/// Returns `Ok(None)` when the crawl was aborted before this page started.
async fn crawl_page<C: RegistryClient>(
    context: Arc<PageContext<C>>,
    semaphore: Arc<Semaphore>,
    request: PageRequest,
    prefetched: Option<PageResult>,
) -> Result<Option<Vec<ProcurementRecord>>> {
    let _permit = tokio::select! {
        biased;
        _ = context.cancel.cancelled() => return Err(IngestError::Cancelled),
        permit = semaphore.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return Ok(None),
        },
    };

    let result = tokio::select! {
        biased;
        _ = context.cancel.cancelled() => Err(IngestError::Cancelled),
        records = fetch_with_cooldown(&context, &request, prefetched) => records.map(Some),
    };

    // Close before the permit is released so no queued page can grab it.
    if result.is_err() {
        semaphore.close();
    }
    result
}

async fn fetch_with_cooldown<C: RegistryClient>(
    context: &PageContext<C>,
    request: &PageRequest,
    mut prefetched: Option<PageResult>,
) -> Result<Vec<ProcurementRecord>> {
    let page_number = request.page_number;
    let mut failures = 0;

    loop {
        context.gate.wait_open().await;

        match fetch_enriched(context, request, prefetched.take()).await {
            Ok(records) => {
                debug!("Page {} done ({} records)", page_number, records.len());
                return Ok(records);
            }
            Err(e) if e.is_transient() => {
                failures += 1;
                if failures > context.max_page_retries {
                    return Err(IngestError::PageRetriesExhausted {
                        page: page_number,
                        attempts: failures,
                        source: e,
                    });
                }
                warn!(
                    "Page {} failed ({}/{}): {}",
                    page_number, failures, context.max_page_retries, e
                );
                context.gate.report_failure().await;
            }
            Err(e) => return Err(IngestError::Registry(e)),
        }
    }
}

async fn fetch_enriched<C: RegistryClient>(
    context: &PageContext<C>,
    request: &PageRequest,
    prefetched: Option<PageResult>,
) -> std::result::Result<Vec<ProcurementRecord>, RegistryError> {
    let page = match prefetched {
        Some(page) => page,
        None => context.client.fetch_page(request).await?,
    };

    let mut records = Vec::with_capacity(page.entries.len());
    for entry in page.entries {
        let items = context.client.fetch_items(&entry.control_number).await?;
        records.push(ProcurementRecord::new(entry, items));
    }
    Ok(records)
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
