//! Maintenance sweeps over the task collection.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use clap::Parser;

use pipeline_core::cli::{init_tracing, load_env_file};
use pipeline_core::maintenance::{Maintenance, MaintenanceReport};
use pipeline_core::{PgTaskStore, Settings};

#[derive(Parser)]
#[command(name = "maintenance")]
#[command(about = "Reclaim expired leases and requeue stale errors")]
struct Cli {
    /// Path to an env file to load first
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Tasks touched per action
    #[arg(long, default_value_t = 200)]
    limit: i64,

    /// Reclaim running tasks whose lease expired
    #[arg(long)]
    reclaim_running: bool,

    /// Requeue error tasks older than this many hours
    #[arg(long)]
    requeue_error_hours: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    load_env_file(cli.env_file.as_deref())?;
    let settings = Settings::from_env()?;

    let store = PgTaskStore::connect(&settings.database_url).await?;
    let maintenance = Maintenance::new(Arc::new(store));
    let now = Utc::now();
    let mut report = MaintenanceReport::default();

    if cli.reclaim_running {
        report.reclaimed = maintenance.reclaim_expired(now, cli.limit).await?;
        println!("Reclaimed running: {}", report.reclaimed);
    }

    if let Some(hours) = cli.requeue_error_hours {
        let cutoff = now - Duration::hours(hours);
        report.requeued = maintenance
            .requeue_errors(cutoff, cli.limit, settings.requeue_max_attempts)
            .await?;
        println!("Requeued errors: {}", report.requeued);
    }

    Ok(())
}
