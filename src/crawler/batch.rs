//! Batched persistence shared by both ingestion modes

use crate::crawler::IngestCounts;
use crate::model::ProcurementRecord;
use crate::storage::{Storage, StorageResult};
use tracing::{info, warn};

/// Saves records through a [`Storage`], flushing every `flush_every` saves
pub(crate) struct BatchWriter<'a, S: Storage + ?Sized> {
    storage: &'a mut S,
    flush_every: usize,
    since_flush: usize,
    counts: IngestCounts,
}

impl<'a, S: Storage + ?Sized> BatchWriter<'a, S> {
    pub(crate) fn new(storage: &'a mut S, flush_every: usize) -> Self {
        Self {
            storage,
            flush_every: flush_every.max(1),
            since_flush: 0,
            counts: IngestCounts::default(),
        }
    }

    pub(crate) fn save(&mut self, record: ProcurementRecord) -> StorageResult<()> {
        self.counts.records_processed += 1;
        self.counts.items_processed += record.items.len() as u64;
        self.storage.save(record)?;

        self.since_flush += 1;
        if self.since_flush >= self.flush_every {
            let summary = self.storage.flush()?;
            self.counts.written.absorb(summary);
            self.since_flush = 0;
            info!(
                "Progress: {} records processed, {} written, {} skipped as stale",
                self.counts.records_processed,
                self.counts.written.written(),
                self.counts.written.skipped
            );
        }
        Ok(())
    }

    pub(crate) fn skip(&mut self) {
        self.counts.entries_skipped += 1;
    }

    #[cfg(test)]
    pub(crate) fn counts(&self) -> &IngestCounts {
        &self.counts
    }

    /// Commits everything saved so far
    pub(crate) fn commit(self) -> StorageResult<IngestCounts> {
        let mut counts = self.counts;
        match self.storage.commit() {
            Ok(summary) => {
                counts.written.absorb(summary);
                Ok(counts)
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    /// Discards everything not yet committed
    pub(crate) fn rollback(self) {
        if let Err(e) = self.storage.rollback() {
            warn!("Rollback failed: {}", e);
        }
    }
}
