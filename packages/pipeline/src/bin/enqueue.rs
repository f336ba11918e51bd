//! Enqueue URLs into the crawl task queue.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;

use pipeline_core::cli::{init_tracing, load_env_file, load_urls};
use pipeline_core::{Campaign, PgTaskStore, Settings, TaskQueue};

#[derive(Parser)]
#[command(name = "enqueue")]
#[command(about = "Enqueue URLs into the crawl task queue")]
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
    if urls.is_empty() {
        bail!("no URLs provided; use --url or --urls-file");
    }

    let campaign = Campaign {
        brand: cli.brand,
        product: cli.product,
        objective: cli.objective,
    };

    let store = PgTaskStore::connect(&settings.database_url).await?;
    let queue = TaskQueue::new(Arc::new(store));
    let outcome = queue.enqueue_urls(&urls, &campaign, cli.force).await?;

    println!(
        "Enqueued: {} created, {} requeued, {} duplicates",
        outcome.created, outcome.requeued, outcome.duplicates
    );
    Ok(())
}
