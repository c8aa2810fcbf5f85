pub mod auth;
pub mod rest;
pub mod retry;
pub mod types;

use crate::error::{CredentialError, FetchError};
use async_trait::async_trait;
use types::{Category, Credential, PageResult};

/// Exchanges account credentials for a bearer credential.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn login(&self, account: &str, password: &str) -> Result<Credential, CredentialError>;
}

/// One listing page per call, one network round-trip per call.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(
        &self,
        credential: &Credential,
        page: u32,
        category: Category,
    ) -> Result<PageResult, FetchError>;
}
