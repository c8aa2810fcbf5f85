use super::types::{Category, Credential, PageResult};
use super::PageFetcher;
use crate::error::FetchError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Wraps a fetcher with bounded retries and linear backoff.
pub struct RetryingFetcher {
    inner: Arc<dyn PageFetcher>,
    max_retries: u32,
    backoff: Duration,
}

impl RetryingFetcher {
    pub fn new(inner: Arc<dyn PageFetcher>, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            backoff,
        }
    }

    /// Delay before retry number `attempt`. Saturates instead of overflowing
    /// on large configured backoffs.
    fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

#[async_trait]
impl PageFetcher for RetryingFetcher {
    async fn fetch_page(
        &self,
        credential: &Credential,
        page: u32,
        category: Category,
    ) -> Result<PageResult, FetchError> {
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }
            match self.inner.fetch_page(credential, page, category).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    tracing::warn!(%category, page, attempt, error = %e, "page fetch failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::PaginationInfo;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with `status` for the first `failures` calls, then succeeds.
    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        status: StatusCode,
    }

    #[async_trait]
    impl PageFetcher for Flaky {
        async fn fetch_page(
            &self,
            _credential: &Credential,
            page: u32,
            _category: Category,
        ) -> Result<PageResult, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(FetchError::Status { page, status: self.status });
            }
            Ok(PageResult {
                pagination: PaginationInfo { current_page: page, page_size: 10, total_count: 10 },
                works: Vec::new(),
            })
        }
    }

    fn flaky(failures: u32, status: StatusCode) -> Arc<Flaky> {
        Arc::new(Flaky { calls: AtomicU32::new(0), failures, status })
    }

    #[tokio::test]
    async fn test_recovers_within_budget() {
        let inner = flaky(2, StatusCode::SERVICE_UNAVAILABLE);
        let fetcher = RetryingFetcher::new(inner.clone(), 3, Duration::from_millis(1));
        let cred = Credential::from_token("t");
        let page = fetcher.fetch_page(&cred, 1, Category::Subtitled).await.unwrap();
        assert_eq!(page.pagination.current_page, 1);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let inner = flaky(10, StatusCode::BAD_GATEWAY);
        let fetcher = RetryingFetcher::new(inner.clone(), 2, Duration::from_millis(1));
        let cred = Credential::from_token("t");
        let err = fetcher.fetch_page(&cred, 5, Category::Subtitled).await.unwrap_err();
        assert_eq!(err.page(), 5);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_huge_backoff_saturates() {
        let fetcher = RetryingFetcher::new(flaky(0, StatusCode::OK), 3, Duration::MAX);
        assert_eq!(fetcher.delay_for(3), Duration::MAX);

        let fetcher = RetryingFetcher::new(flaky(0, StatusCode::OK), 3, Duration::from_millis(500));
        assert_eq!(fetcher.delay_for(2), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let inner = flaky(10, StatusCode::UNAUTHORIZED);
        let fetcher = RetryingFetcher::new(inner.clone(), 5, Duration::from_millis(1));
        let cred = Credential::from_token("t");
        assert!(fetcher.fetch_page(&cred, 1, Category::Unsubtitled).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
