use super::types::{Category, Credential, PageResult};
use super::PageFetcher;
use crate::config::ApiConfig;
use crate::error::FetchError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::Client;
use std::time::Duration;

/// Build the HTTP client for one session. Each pipeline gets its own.
pub fn build_client(api: &ApiConfig) -> Result<Client> {
    Client::builder()
        .pool_max_idle_per_host(4)
        .timeout(Duration::from_millis(api.request_timeout_ms))
        .user_agent(api.user_agent.as_str())
        .build()
        .context("failed to build HTTP client")
}

/// Pick the API base URL once at startup. An explicit `base_url` wins;
/// otherwise one probe decides between the primary and fallback mirrors.
pub async fn resolve_base_url(client: &Client, api: &ApiConfig) -> String {
    if let Some(base) = api.base_url.as_deref().filter(|b| !b.trim().is_empty()) {
        return base.trim_end_matches('/').to_string();
    }

    let reachable = match client.get(&api.probe_url).send().await {
        Ok(resp) if resp.status().is_success() => true,
        Ok(resp) => {
            tracing::warn!(url = %api.probe_url, status = %resp.status(), "probe returned non-success");
            false
        }
        Err(e) => {
            tracing::warn!(url = %api.probe_url, error = %e, "probe request failed");
            false
        }
    };

    let chosen = if reachable { &api.primary_url } else { &api.fallback_url };
    tracing::info!(base_url = %chosen, "resolved catalog base URL");
    chosen.trim_end_matches('/').to_string()
}

/// Desktop browser agents picked from for each listing request.
const BROWSER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
];

fn random_user_agent() -> &'static str {
    BROWSER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(BROWSER_AGENTS[0])
}

pub struct CatalogRest {
    client: Client,
    base_url: String,
    seed: u32,
    rotate_user_agent: bool,
}

impl CatalogRest {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            seed: rand::thread_rng().gen_range(1..100),
            rotate_user_agent: true,
        }
    }

    /// When off, listing requests keep the client's configured user agent.
    pub fn with_agent_rotation(mut self, rotate: bool) -> Self {
        self.rotate_user_agent = rotate;
        self
    }

    /// Seed the server uses to shuffle results. Fixed per session so paging
    /// stays consistent.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    fn page_url(&self, page: u32, category: Category) -> String {
        format!(
            "{}/api/works?order=create_date&sort=desc&page={}&seed={}&subtitle={}",
            self.base_url,
            page,
            self.seed,
            category.flag()
        )
    }
}

#[async_trait]
impl PageFetcher for CatalogRest {
    async fn fetch_page(
        &self,
        credential: &Credential,
        page: u32,
        category: Category,
    ) -> Result<PageResult, FetchError> {
        let url = self.page_url(page, category);
        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, credential.header_value())
            .header(reqwest::header::ACCEPT, "application/json, text/plain, */*");
        if self.rotate_user_agent {
            request = request.header(reqwest::header::USER_AGENT, random_user_agent());
        }
        let resp = request
            .send()
            .await
            .map_err(|source| FetchError::Transport { page, source })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { page, status });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|source| FetchError::Transport { page, source })?;
        serde_json::from_slice(&body).map_err(|source| FetchError::Decode { page, source })
    }
}
