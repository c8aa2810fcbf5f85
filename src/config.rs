use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const ENV_FILE: &str = ".env";
const ACCOUNT_ENV: &str = "ASMR_ACCOUNT";
const PASSWORD_ENV: &str = "ASMR_PASSWORD";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AccountConfig {
    pub name: String,
    pub password: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            name: "guest".to_string(),
            password: "guest".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    /// Skip the mirror probe and use this base URL.
    pub base_url: Option<String>,
    pub probe_url: String,
    pub primary_url: String,
    pub fallback_url: String,
    pub auth_url: String,
    pub request_timeout_ms: u64,
    pub user_agent: String,
    /// Send a random browser user agent with each listing request.
    pub rotate_user_agent: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            probe_url: "https://asmr.one".to_string(),
            primary_url: "https://api.asmr-100.com".to_string(),
            fallback_url: "https://api.asmr-200.com".to_string(),
            auth_url: "https://api.asmr.one/api/auth/me".to_string(),
            request_timeout_ms: 15_000,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string(),
            rotate_user_agent: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DrainMode {
    #[default]
    Merged,
    Sequential,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CrawlConfig {
    pub max_workers: usize,
    pub channel_capacity: usize,
    pub max_failed_retry: u32,
    pub retry_backoff_ms: u64,
    /// Upper bound on pages crawled per category.
    pub page_limit: Option<u32>,
    pub drain_mode: DrainMode,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_workers: 6,
            channel_capacity: 5,
            max_failed_retry: 3,
            retry_backoff_ms: 500,
            page_limit: None,
            drain_mode: DrainMode::Merged,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: "sqlite://asmr.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct LogConfig {
    /// Write logs here instead of stderr.
    pub file: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config TOML: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, writing a default config there first if it does not exist.
    /// Returns the config and whether it was freshly generated.
    pub fn load_or_init(path: &Path) -> Result<(Self, bool)> {
        if path.exists() {
            return Ok((Self::load(path)?, false));
        }
        let config = Config::default();
        let body = toml::to_string_pretty(&config).context("Failed to serialize default config")?;
        std::fs::write(path, body)
            .with_context(|| format!("Failed to write default config: {}", path.display()))?;
        Ok((config, true))
    }

    fn validate(&self) -> Result<()> {
        if self.crawl.max_workers == 0 {
            anyhow::bail!("crawl.max_workers must be at least 1");
        }
        if self.crawl.channel_capacity == 0 {
            anyhow::bail!("crawl.channel_capacity must be at least 1");
        }
        if self.crawl.page_limit == Some(0) {
            anyhow::bail!("crawl.page_limit must be at least 1 when set");
        }
        Ok(())
    }

    /// Let ASMR_ACCOUNT / ASMR_PASSWORD override the file's credentials.
    pub fn apply_env_overrides(&mut self) {
        if let Some(name) = non_empty_env(ACCOUNT_ENV) {
            self.account.name = name;
        }
        if let Some(password) = non_empty_env(PASSWORD_ENV) {
            self.account.password = password;
        }
    }

    /// Load .env file into process environment. Real env vars take precedence.
    pub fn load_env_file() {
        let path = Path::new(ENV_FILE);
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return,
        };
        for (key, value) in parse_env_lines(&content) {
            if std::env::var(key).is_err() {
                std::env::set_var(key, value);
            }
        }
    }

    /// Effective configuration for the startup log, password masked.
    pub fn redacted_summary(&self) -> String {
        format!(
            "account={} password={} base_url={} max_workers={} channel_capacity={} max_failed_retry={} page_limit={} drain_mode={:?} database={}",
            self.account.name,
            mask(&self.account.password),
            self.api.base_url.as_deref().unwrap_or("<probe>"),
            self.crawl.max_workers,
            self.crawl.channel_capacity,
            self.crawl.max_failed_retry,
            self.crawl.page_limit.map_or_else(|| "none".to_string(), |n| n.to_string()),
            self.crawl.drain_mode,
            self.storage.database,
        )
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env_lines(content: &str) -> Vec<(&str, &str)> {
    // Strip BOM if present (common on Windows-created files)
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    content
        .lines()
        .map(|line| line.trim().trim_matches('\r'))
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim().trim_matches('"').trim_matches('\'')))
        .collect()
}

/// Keep the first and last character, star out the rest.
fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    match chars.len() {
        0 => String::new(),
        1 | 2 => "*".repeat(chars.len()),
        n => format!("{}{}{}", chars[0], "*".repeat(n - 2), chars[n - 1]),
    }
}
