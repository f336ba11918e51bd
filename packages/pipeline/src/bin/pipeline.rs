//! Full staged batch run: maintenance, enqueue, crawl, analyze,
//! quality-review, report.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use clap::Parser;

use pipeline_core::analyze::Analyzer;
use pipeline_core::cli::{init_tracing, load_env_file, load_urls};
use pipeline_core::driver::{PipelineDriver, PipelineOptions};
use pipeline_core::llm::LlmClient;
use pipeline_core::maintenance::Maintenance;
use pipeline_core::review::QualityReviewer;
use pipeline_core::worker::{CrawlWorker, CrawlWorkerConfig};
use pipeline_core::{Campaign, PgTaskStore, Settings, TaskQueue};
use site_crawler::{DomainThrottle, PageFetcher, RobotsCache};

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "Run the full MarketSense batch pipeline")]
struct Cli {
    /// Path to an env file to load first
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Target URL (can repeat)
    #[arg(long = "url")]
    urls: Vec<String>,

    /// File with URLs, one per line
    #[arg(long)]
    urls_file: Option<PathBuf>,

    /// Reset existing tasks to pending instead of skipping them
    #[arg(long)]
    force: bool,

    /// Tasks claimed per crawl batch
    #[arg(long, default_value_t = 50)]
    limit: usize,

    /// Lease duration for claimed tasks
    #[arg(long)]
    lease_seconds: Option<i64>,

    /// Limit analyzed/reviewed tasks
    #[arg(long)]
    analyze_limit: Option<usize>,

    /// Run the LLM quality review stage
    #[arg(long)]
    quality_review: bool,

    /// Skip LLM calls and record mock analyses
    #[arg(long)]
    dry_run: bool,

    #[arg(long, default_value = "")]
    brand: String,

    #[arg(long, default_value = "")]
    product: String,

    /// Marketing objective
    #[arg(long, default_value = "")]
    objective: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    load_env_file(cli.env_file.as_deref())?;
    let settings = Settings::from_env()?;

    let urls = load_urls(&cli.urls, cli.urls_file.as_deref())?;
    let campaign = Campaign {
        brand: cli.brand,
        product: cli.product,
        objective: cli.objective,
    };

    let store = Arc::new(PgTaskStore::connect(&settings.database_url).await?);
    let queue = TaskQueue::new(store.clone());

    // Recover stuck and stale tasks before enqueueing new work.
    let maintenance = Maintenance::new(store.clone());
    let now = Utc::now();
    let reclaimed = maintenance.reclaim_expired(now, cli.limit as i64).await?;
    let mut requeued = 0;
    if settings.requeue_error_after_hours > 0 {
        let cutoff = now - Duration::hours(settings.requeue_error_after_hours);
        requeued = maintenance
            .requeue_errors(cutoff, cli.limit as i64, settings.requeue_max_attempts)
            .await?;
    }
    println!("Maintenance: {reclaimed} reclaimed, {requeued} requeued");

    let fetcher = PageFetcher::new(&settings.fetch_config())?;
    let robots = RobotsCache::new(settings.robots_config(), fetcher.client());
    let throttle = DomainThrottle::new(settings.throttle_config());

    let mut worker_config = CrawlWorkerConfig::from_settings(&settings);
    worker_config.claim_limit = cli.limit;
    if let Some(lease_seconds) = cli.lease_seconds {
        worker_config.lease_seconds = lease_seconds;
    }
    let worker = CrawlWorker::new(
        queue.clone(),
        Arc::new(fetcher),
        Arc::new(throttle),
        Arc::new(robots),
        worker_config,
    );

    let llm = Arc::new(LlmClient::new(settings.llm.clone(), cli.dry_run)?);
    let analyzer = Analyzer::new(queue.clone(), llm.clone(), settings.max_text_chars);
    let reviewer = QualityReviewer::new(queue.clone(), llm, campaign.clone());

    let driver = PipelineDriver::new(queue, worker, analyzer, reviewer);
    let options = PipelineOptions {
        urls,
        campaign,
        force: cli.force,
        analyze_limit: cli.analyze_limit,
        quality_review: cli.quality_review,
    };
    let report = driver.run(&options).await?;

    println!(
        "Crawler completed: {}/{} | Blocked suspected: {}",
        report.crawl.completed, report.crawl.claimed, report.summary.blocked_suspected
    );
    println!("Analyzer processed: {}", report.analyzed);
    if cli.quality_review {
        println!("Quality reviewed: {}", report.reviewed);
    }
    println!("{}", serde_json::to_string_pretty(&report.summary)?);
    Ok(())
}
