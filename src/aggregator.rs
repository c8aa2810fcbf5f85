use crate::catalog::types::PageResult;
use crate::config::DrainMode;
use crate::error::StoreError;
use crate::store::{DownloadRecord, InsertOutcome, RecordStore};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub pages: usize,
    pub works_seen: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub insert_failures: usize,
}

impl DrainReport {
    fn absorb(&mut self, other: DrainReport) {
        self.pages += other.pages;
        self.works_seen += other.works_seen;
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.insert_failures += other.insert_failures;
    }
}

/// Single consumer of page results and the only writer to the store.
/// Lookups that fail stop the drain; failed inserts are counted and skipped.
pub struct Aggregator {
    store: Arc<dyn RecordStore>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Consume every channel until all are closed and empty.
    pub async fn drain_all(
        &self,
        mode: DrainMode,
        channels: Vec<mpsc::Receiver<PageResult>>,
    ) -> Result<DrainReport, StoreError> {
        match mode {
            DrainMode::Merged => self.drain_merged(channels).await,
            DrainMode::Sequential => self.drain_sequential(channels).await,
        }
    }

    /// Drain one channel to exhaustion.
    pub async fn drain(&self, mut rx: mpsc::Receiver<PageResult>) -> Result<DrainReport, StoreError> {
        let mut report = DrainReport::default();
        while let Some(page) = rx.recv().await {
            self.persist_page(&page, &mut report).await?;
        }
        Ok(report)
    }

    /// Take pages from whichever channel has one ready.
    pub async fn drain_merged(
        &self,
        channels: Vec<mpsc::Receiver<PageResult>>,
    ) -> Result<DrainReport, StoreError> {
        let mut merged = futures_util::stream::select_all(channels.into_iter().map(ReceiverStream::new));
        let mut report = DrainReport::default();
        while let Some(page) = merged.next().await {
            self.persist_page(&page, &mut report).await?;
        }
        Ok(report)
    }

    /// Drain the channels one after another, in the order given. A channel
    /// further down the list only buffers up to its capacity meanwhile.
    pub async fn drain_sequential(
        &self,
        channels: Vec<mpsc::Receiver<PageResult>>,
    ) -> Result<DrainReport, StoreError> {
        let mut report = DrainReport::default();
        for rx in channels {
            report.absorb(self.drain(rx).await?);
        }
        Ok(report)
    }

    async fn persist_page(&self, page: &PageResult, report: &mut DrainReport) -> Result<(), StoreError> {
        report.pages += 1;
        for work in &page.works {
            report.works_seen += 1;
            let record = DownloadRecord::from_work(work);
            match self.store.insert_if_absent(&record).await {
                Ok(InsertOutcome::Inserted) => {
                    report.inserted += 1;
                    tracing::debug!(external_id = %record.external_id, "stored new work");
                }
                Ok(InsertOutcome::AlreadyPresent) => report.duplicates += 1,
                Err(e) if e.is_fatal() => {
                    tracing::error!(source_id = work.id, error = %e, "store lookup failed, stopping drain");
                    return Err(e);
                }
                Err(e) => {
                    report.insert_failures += 1;
                    tracing::warn!(source_id = work.id, error = %e, "insert rolled back, skipping work");
                }
            }
        }
        tracing::debug!(
            page = page.pagination.current_page,
            works = page.works.len(),
            total_pages = report.pages,
            "page persisted"
        );
        Ok(())
    }
}
