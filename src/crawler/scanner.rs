//! Reverse-chronological window scanner
//!
//! The update feed lists entries oldest first, so walking it backwards
//! (last page first, last entry first) visits the newest records first and
//! can stop at the first entry older than the requested bounds.

use crate::crawler::batch::BatchWriter;
use crate::crawler::IngestCounts;
use crate::model::{
    IngestionWindow, Modality, PageRequest, PageResult, PageSize, ProcurementRecord, TimeBounds,
    WindowPosition,
};
use crate::registry::RegistryClient;
use crate::storage::Storage;
use crate::{IngestError, Result};
use chrono::NaiveDateTime;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of a completed scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub counts: IngestCounts,
    /// Distinct pages requested, the page-1 probe included
    pub pages_fetched: u32,
    /// Whether the scan stopped at an entry older than the bounds
    pub stopped_early: bool,
    pub elapsed: Duration,
}

/// Walks a window from its newest page to its oldest
pub struct WindowScanner<C> {
    client: Arc<C>,
    modality: Modality,
    page_size: PageSize,
    flush_every: usize,
    cancel: CancellationToken,
}

impl<C: RegistryClient> WindowScanner<C> {
    pub fn new(
        client: Arc<C>,
        modality: Modality,
        page_size: PageSize,
        flush_every: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            modality,
            page_size,
            flush_every,
            cancel,
        }
    }

    /// Scans `window`, saving every entry inside `bounds`
    ///
    /// Commits once on success. On any error the uncommitted batch is
    /// rolled back before the error is returned.
    pub async fn run<S: Storage + ?Sized>(
        &self,
        window: IngestionWindow,
        bounds: TimeBounds,
        storage: &mut S,
    ) -> Result<ScanReport> {
        let started = Instant::now();
        let mut writer = BatchWriter::new(storage, self.flush_every);
        let mut report = ScanReport::default();

        match self.scan(window, bounds, &mut writer, &mut report).await {
            Ok(()) => {
                report.counts = writer.commit()?;
                report.elapsed = started.elapsed();
                info!(
                    "Scan of {} finished: {} records, {} pages, stopped early: {}",
                    window, report.counts.records_processed, report.pages_fetched, report.stopped_early
                );
                Ok(report)
            }
            Err(e) => {
                writer.rollback();
                Err(e)
            }
        }
    }

    async fn scan<S: Storage + ?Sized>(
        &self,
        window: IngestionWindow,
        bounds: TimeBounds,
        writer: &mut BatchWriter<'_, S>,
        report: &mut ScanReport,
    ) -> Result<()> {
        let request = PageRequest::first(window, self.modality, self.page_size);

        let probe = self.cancellable(self.client.fetch_page(&request)).await??;
        report.pages_fetched = 1;
        let total_pages = probe.total_pages;
        if total_pages == 0 || probe.is_empty {
            info!("Window {} has no records", window);
            return Ok(());
        }
        info!(
            "Scanning {} pages ({} records) for window {}",
            total_pages, probe.total_records, window
        );

        let mut probe = Some(probe);
        let mut newest_seen: Option<NaiveDateTime> = None;

        for page_number in (1..=total_pages).rev() {
            let page = match (page_number, probe.take()) {
                (1, Some(page)) => page,
                (_, kept) => {
                    probe = kept;
                    report.pages_fetched += 1;
                    self.cancellable(self.client.fetch_page(&request.page(page_number)))
                        .await??
                }
            };
            debug!(
                "Page {}/{}: {} entries",
                page_number,
                total_pages,
                page.entries.len()
            );

            for (index, entry) in page.entries.into_iter().enumerate().rev() {
                if let Some(previous) = newest_seen {
                    if entry.updated_at > previous {
                        return Err(IngestError::OrderViolation {
                            page: page_number,
                            index,
                            previous,
                            current: entry.updated_at,
                        });
                    }
                }
                newest_seen = Some(entry.updated_at);

                match bounds.position(entry.updated_at) {
                    WindowPosition::Before => {
                        debug!(
                            "Entry {} at {} is older than {}, stopping",
                            entry.control_number, entry.updated_at, bounds.start
                        );
                        report.stopped_early = true;
                        return Ok(());
                    }
                    WindowPosition::After => writer.skip(),
                    WindowPosition::Within => {
                        let items = self
                            .cancellable(self.client.fetch_items(&entry.control_number))
                            .await??;
                        writer.save(ProcurementRecord::new(entry, items))?;
                    }
                }
            }
        }

        Ok(())
    }

    async fn cancellable<T>(&self, call: impl Future<Output = T>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IngestError::Cancelled),
            value = call => Ok(value),
        }
    }
}

/// First page of a window, used to size a run before starting it
pub async fn probe_window<C: RegistryClient + ?Sized>(
    client: &C,
    window: IngestionWindow,
    modality: Modality,
    page_size: PageSize,
) -> Result<PageResult> {
    let request = PageRequest::first(window, modality, page_size);
    Ok(client.fetch_page(&request).await?)
}
