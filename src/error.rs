use crate::catalog::types::Category;
use reqwest::StatusCode;
use thiserror::Error;

/// Login failed. Always fatal to the pipeline that attempted it.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("login request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("login rejected ({status}): {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("malformed login response: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("login response carried no token")]
    MissingToken,
}

/// A single page could not be turned into a `PageResult`.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("page {page}: request failed: {source}")]
    Transport {
        page: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("page {page}: server returned {status}")]
    Status { page: u32, status: StatusCode },
    #[error("page {page}: malformed response: {source}")]
    Decode {
        page: u32,
        #[source]
        source: serde_json::Error,
    },
    #[error("page {page}: result channel closed before delivery")]
    ChannelClosed { page: u32 },
    #[error("page {page}: fetch panicked")]
    Panicked { page: u32 },
}

impl FetchError {
    pub fn page(&self) -> u32 {
        match self {
            FetchError::Transport { page, .. }
            | FetchError::Status { page, .. }
            | FetchError::Decode { page, .. }
            | FetchError::ChannelClosed { page }
            | FetchError::Panicked { page } => *page,
        }
    }

    /// Transport failures, 5xx and 429 are worth another attempt. A 4xx or a
    /// body we cannot parse will not get better by asking again.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            FetchError::Decode { .. } | FetchError::ChannelClosed { .. } | FetchError::Panicked { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("running migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("lookup of source id {source_id} failed: {source}")]
    Lookup {
        source_id: i64,
        #[source]
        source: sqlx::Error,
    },
    #[error("insert of source id {source_id} failed: {source}")]
    Insert {
        source_id: i64,
        #[source]
        source: sqlx::Error,
    },
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),
}

impl StoreError {
    /// Lookup and connection failures leave the dedup state unknown; the
    /// drain cannot continue past them.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StoreError::Insert { .. })
    }
}

/// Reasons a whole category pipeline stopped.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{category}: {source}")]
    Credential {
        category: Category,
        #[source]
        source: CredentialError,
    },
    #[error("{category}: first page unavailable: {source}")]
    FirstPage {
        category: Category,
        #[source]
        source: FetchError,
    },
    #[error("{category}: cancelled")]
    Cancelled { category: Category },
    #[error("{category}: pipeline task failed: {message}")]
    Task { category: Category, message: String },
}
