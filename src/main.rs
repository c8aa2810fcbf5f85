use anyhow::{Context, Result};
use asmr_crawler::aggregator::{Aggregator, DrainReport};
use asmr_crawler::catalog::auth::CatalogAuth;
use asmr_crawler::catalog::rest::{build_client, resolve_base_url, CatalogRest};
use asmr_crawler::catalog::retry::RetryingFetcher;
use asmr_crawler::catalog::types::Category;
use asmr_crawler::catalog::PageFetcher;
use asmr_crawler::config::Config;
use asmr_crawler::error::PipelineError;
use asmr_crawler::pipeline::{CategoryPipeline, PipelineSettings, PipelineSummary};
use asmr_crawler::store::SqliteStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config.toml";
const DEFAULT_FILTER: &str = "asmr_crawler=info";

fn config_path_from_args() -> PathBuf {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

fn init_tracing(log_file: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create log file: {}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn print_report(summaries: &[PipelineSummary], drain: Option<&DrainReport>, stored: Option<u64>) {
    println!();
    println!("  crawl report");
    for s in summaries {
        println!(
            "  {:<12} pages {:>4}/{:<4} failed {:>3} cancelled {:>3}",
            s.category.as_str(),
            s.pages_sent,
            s.max_page,
            s.failed_pages.len(),
            s.cancelled,
        );
        if !s.failed_pages.is_empty() {
            println!("  {:<12} failed pages: {:?}", "", s.failed_pages);
        }
    }
    if let Some(d) = drain {
        println!(
            "  stored {} new, {} already known, {} insert failures ({} works over {} pages)",
            d.inserted, d.duplicates, d.insert_failures, d.works_seen, d.pages,
        );
    }
    if let Some(n) = stored {
        println!("  store now holds {} records", n);
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load saved credentials from .env (real env vars take precedence)
    Config::load_env_file();

    let config_path = config_path_from_args();
    let (mut config, created) = Config::load_or_init(&config_path)?;
    config.apply_env_overrides();

    init_tracing(config.log.file.as_deref())?;
    if created {
        tracing::info!(path = %config_path.display(), "no config found, wrote defaults");
    }
    tracing::info!(config = %config.redacted_summary(), "starting crawl");

    let store = Arc::new(
        SqliteStore::open(&config.storage.database)
            .await
            .with_context(|| format!("Failed to open store {}", config.storage.database))?,
    );

    let probe_client = build_client(&config.api)?;
    let base_url = resolve_base_url(&probe_client, &config.api).await;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling crawl");
                cancel.cancel();
            }
        });
    }

    let settings = PipelineSettings::from(&config.crawl);
    let backoff = Duration::from_millis(config.crawl.retry_backoff_ms);
    let mut receivers = Vec::with_capacity(Category::ALL.len());
    let mut handles = Vec::with_capacity(Category::ALL.len());

    for category in Category::ALL {
        // One client per category: sessions share nothing.
        let client = build_client(&config.api)?;
        let auth = Arc::new(CatalogAuth::new(client.clone(), &config.api.auth_url));
        let rest = CatalogRest::new(client, &base_url).with_agent_rotation(config.api.rotate_user_agent);
        tracing::info!(%category, seed = rest.seed(), "session prepared");

        let rest: Arc<dyn PageFetcher> = Arc::new(rest);
        let fetcher = Arc::new(RetryingFetcher::new(rest, config.crawl.max_failed_retry, backoff));
        let pipeline = CategoryPipeline::new(
            category,
            auth,
            fetcher,
            config.account.clone(),
            settings,
            cancel.clone(),
        );
        let (rx, handle) = pipeline.spawn();
        receivers.push(rx);
        handles.push((category, handle));
    }

    let aggregator = Aggregator::new(store.clone());
    let drained = aggregator.drain_all(config.crawl.drain_mode, receivers).await;
    if drained.is_err() {
        // Receivers are gone; stop producers instead of letting them fail page by page.
        cancel.cancel();
    }

    let mut errors = 0usize;
    let mut summaries = Vec::new();
    for (category, handle) in handles {
        let outcome = handle.await.unwrap_or_else(|e| {
            Err(PipelineError::Task {
                category,
                message: e.to_string(),
            })
        });
        match outcome {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                tracing::error!(error = %e, "category pipeline failed");
                eprintln!("  {}", e);
                errors += 1;
            }
        }
    }

    let drain_report = match drained {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::error!(error = %e, "aggregator stopped");
            eprintln!("  store error: {}", e);
            errors += 1;
            None
        }
    };

    let stored = match store.count().await {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!(error = %e, "could not count stored records");
            None
        }
    };
    print_report(&summaries, drain_report.as_ref(), stored);
    store.close().await;

    if errors > 0 {
        anyhow::bail!("crawl finished with {} error(s)", errors);
    }
    Ok(())
}
