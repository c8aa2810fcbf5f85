use serde::{Deserialize, Serialize};
use std::fmt;

/// Listing partition by subtitle presence. Each category is crawled by its
/// own pipeline and session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Subtitled,
    Unsubtitled,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Subtitled, Category::Unsubtitled];

    /// Value of the `subtitle` query parameter.
    pub fn flag(self) -> u8 {
        match self {
            Category::Subtitled => 1,
            Category::Unsubtitled => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Subtitled => "subtitled",
            Category::Unsubtitled => "unsubtitled",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bearer credential for one session. Lives for one program run.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn from_token(token: &str) -> Self {
        Self(format!("Bearer {}", token))
    }

    /// Full `Authorization` header value.
    pub fn header_value(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(Bearer ***)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    #[serde(default)]
    pub current_page: u32,
    pub page_size: u32,
    pub total_count: u64,
}

impl PaginationInfo {
    /// ceil(total / page_size), never below 1. A zero page size from the
    /// server counts as a single page.
    pub fn max_page(&self) -> u32 {
        if self.page_size == 0 || self.total_count == 0 {
            return 1;
        }
        let pages = self.total_count.div_ceil(self.page_size as u64);
        pages.clamp(1, u32::MAX as u64) as u32
    }
}

/// One catalog entry. Only the fields the crawl needs are decoded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Work {
    pub id: i64,
    #[serde(default)]
    pub title: String,
}

/// `GET /api/works` response body.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PageResult {
    pub pagination: PaginationInfo,
    #[serde(default)]
    pub works: Vec<Work>,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub name: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    #[serde(default)]
    pub token: Option<String>,
}
