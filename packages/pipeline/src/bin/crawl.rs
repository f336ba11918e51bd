//! Claim-and-crawl worker: drains the pending queue.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use pipeline_core::cli::{init_tracing, load_env_file};
use pipeline_core::worker::{CrawlWorker, CrawlWorkerConfig};
use pipeline_core::{PgTaskStore, Settings, TaskQueue};
use site_crawler::{DomainThrottle, PageFetcher, RobotsCache};

#[derive(Parser)]
#[command(name = "crawl")]
#[command(about = "Claim pending tasks and crawl them")]
struct Cli {
    /// Path to an env file to load first
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Tasks claimed per batch
    #[arg(long, default_value_t = 50)]
    limit: usize,

    /// Lease duration for claimed tasks
    #[arg(long)]
    lease_seconds: Option<i64>,

    /// Max concurrent fetches
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Fetch attempts per task
    #[arg(long)]
    retries: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    load_env_file(cli.env_file.as_deref())?;
    let settings = Settings::from_env()?;

    let store = PgTaskStore::connect(&settings.database_url).await?;
    let queue = TaskQueue::new(Arc::new(store));

    let fetcher = PageFetcher::new(&settings.fetch_config())?;
    let robots = RobotsCache::new(settings.robots_config(), fetcher.client());
    let throttle = DomainThrottle::new(settings.throttle_config());

    let mut config = CrawlWorkerConfig::from_settings(&settings);
    config.claim_limit = cli.limit;
    if let Some(lease_seconds) = cli.lease_seconds {
        config.lease_seconds = lease_seconds;
    }
    if let Some(max_concurrent) = cli.max_concurrent {
        config.max_concurrent = max_concurrent;
    }
    if let Some(retries) = cli.retries {
        config.retries = retries;
    }

    let worker = CrawlWorker::new(
        queue,
        Arc::new(fetcher),
        Arc::new(throttle),
        Arc::new(robots),
        config,
    );
    let stats = worker.drain().await?;

    println!(
        "Completed: {}/{} | Failed: {} | Skipped: {} | Lease lost: {}",
        stats.completed, stats.claimed, stats.failed, stats.skipped, stats.lease_lost
    );
    Ok(())
}
