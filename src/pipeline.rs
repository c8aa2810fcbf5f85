use crate::catalog::types::{Category, PageResult};
use crate::catalog::{CredentialProvider, PageFetcher};
use crate::config::{AccountConfig, CrawlConfig};
use crate::error::{FetchError, PipelineError};
use crate::pool::WorkerPool;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Knobs a pipeline needs from the crawl config.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub max_workers: usize,
    pub channel_capacity: usize,
    pub page_limit: Option<u32>,
}

impl From<&CrawlConfig> for PipelineSettings {
    fn from(crawl: &CrawlConfig) -> Self {
        Self {
            max_workers: crawl.max_workers,
            channel_capacity: crawl.channel_capacity,
            page_limit: crawl.page_limit,
        }
    }
}

/// What one category crawl produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub category: Category,
    pub max_page: u32,
    pub pages_sent: usize,
    /// Pages that produced nothing: failed after retries, lost their
    /// consumer, or panicked. Ascending.
    pub failed_pages: Vec<u32>,
    pub cancelled: usize,
}

pub type PipelineHandle = JoinHandle<Result<PipelineSummary, PipelineError>>;

/// Crawls every page of one category into a bounded channel.
///
/// Page failures are logged and recorded but never stop the other pages or
/// close the channel early. Login failure and an unreadable first page end
/// the pipeline before any page job is submitted.
pub struct CategoryPipeline {
    category: Category,
    auth: Arc<dyn CredentialProvider>,
    fetcher: Arc<dyn PageFetcher>,
    account: AccountConfig,
    settings: PipelineSettings,
    cancel: CancellationToken,
}

impl CategoryPipeline {
    pub fn new(
        category: Category,
        auth: Arc<dyn CredentialProvider>,
        fetcher: Arc<dyn PageFetcher>,
        account: AccountConfig,
        settings: PipelineSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            category,
            auth,
            fetcher,
            account,
            settings,
            cancel,
        }
    }

    /// Start the crawl on its own task. The receiver yields pages as they
    /// arrive and closes once every page job has finished.
    pub fn spawn(self) -> (mpsc::Receiver<PageResult>, PipelineHandle) {
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let handle = tokio::spawn(self.run(tx));
        (rx, handle)
    }

    pub async fn run(self, tx: mpsc::Sender<PageResult>) -> Result<PipelineSummary, PipelineError> {
        let category = self.category;

        let login = self.auth.login(&self.account.name, &self.account.password);
        let credential = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled { category }),
            result = login => result.map_err(|source| PipelineError::Credential { category, source })?,
        };
        tracing::info!(%category, account = %self.account.name, "logged in");

        let probe = self.fetcher.fetch_page(&credential, 1, category);
        let first = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled { category }),
            result = probe => result.map_err(|source| PipelineError::FirstPage { category, source })?,
        };

        let computed = first.pagination.max_page();
        let max_page = match self.settings.page_limit {
            Some(limit) => computed.min(limit.max(1)),
            None => computed,
        };
        tracing::info!(
            %category,
            total_count = first.pagination.total_count,
            page_size = first.pagination.page_size,
            max_page,
            "crawling category"
        );

        let credential = Arc::new(credential);
        let failed_pages = Arc::new(Mutex::new(Vec::new()));
        let mut pool: WorkerPool<FetchError> = WorkerPool::new(self.settings.max_workers, self.cancel.clone());

        for page in 1..=max_page {
            let fetcher = self.fetcher.clone();
            let credential = credential.clone();
            let tx = tx.clone();
            let failed_pages = failed_pages.clone();

            let submitted = pool
                .submit(move || async move {
                    let outcome = AssertUnwindSafe(fetch_and_forward(fetcher.as_ref(), &credential, page, category, &tx))
                        .catch_unwind()
                        .await
                        .unwrap_or(Err(FetchError::Panicked { page }));
                    if let Err(e) = &outcome {
                        tracing::warn!(%category, page, error = %e, "page dropped from crawl");
                        if let Ok(mut failed) = failed_pages.lock() {
                            failed.push(page);
                        }
                    }
                    outcome
                })
                .await;
            if submitted.is_err() {
                tracing::warn!(%category, page, "crawl cancelled, no further pages submitted");
                break;
            }
        }

        let report = pool.wait().await;
        // Last sender goes away here; the consumer sees the channel close.
        drop(tx);

        let mut failed_pages = failed_pages
            .lock()
            .map(|failed| failed.clone())
            .unwrap_or_default();
        failed_pages.sort_unstable();

        let summary = PipelineSummary {
            category,
            max_page,
            pages_sent: report.completed,
            failed_pages,
            cancelled: report.cancelled,
        };
        tracing::info!(
            %category,
            pages_sent = summary.pages_sent,
            failed = summary.failed_pages.len(),
            cancelled = summary.cancelled,
            panicked = report.panicked,
            "category crawl finished"
        );
        Ok(summary)
    }
}

/// Fetch one page and hand it to the consumer. The send waits while the
/// channel is full.
async fn fetch_and_forward(
    fetcher: &dyn PageFetcher,
    credential: &crate::catalog::types::Credential,
    page: u32,
    category: Category,
    tx: &mpsc::Sender<PageResult>,
) -> Result<(), FetchError> {
    let result = fetcher.fetch_page(credential, page, category).await?;
    tracing::debug!(%category, page, works = result.works.len(), "page fetched");
    tx.send(result)
        .await
        .map_err(|_| FetchError::ChannelClosed { page })
}
