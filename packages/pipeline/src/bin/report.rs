//! Aggregate metrics over the task collection.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use pipeline_core::cli::{init_tracing, load_env_file};
use pipeline_core::report::summarize;
use pipeline_core::store::TaskStore;
use pipeline_core::{PgTaskStore, Settings};

#[derive(Parser)]
#[command(name = "report")]
#[command(about = "Summarize crawl, analysis, and quality metrics")]
struct Cli {
    /// Path to an env file to load first
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Tasks scanned for the summary
    #[arg(long, default_value_t = 1000)]
    limit: i64,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    load_env_file(cli.env_file.as_deref())?;
    let settings = Settings::from_env()?;

    let store = PgTaskStore::connect(&settings.database_url).await?;
    let tasks = store.list_all(cli.limit).await?;
    let summary = summarize(&tasks);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Tasks: {}", summary.total);
    for (status, count) in &summary.status_counts {
        println!("  {status}: {count}");
    }
    println!(
        "Block rate: {:.1}% ({} suspected)",
        summary.block_rate * 100.0,
        summary.blocked_suspected
    );
    println!("Error rate: {:.1}%", summary.error_rate * 100.0);
    println!(
        "Latency ms: avg {:.0} / p50 {:.0} / p95 {:.0}",
        summary.avg_latency_ms, summary.p50_latency_ms, summary.p95_latency_ms
    );
    if !summary.top_block_signals.is_empty() {
        println!("Top block signals:");
        for signal in &summary.top_block_signals {
            println!("  {}: {}", signal.signal, signal.count);
        }
    }
    if !summary.domain_block_rates.is_empty() {
        println!("Domains by block rate:");
        for domain in &summary.domain_block_rates {
            println!(
                "  {}: {}/{} ({:.1}%)",
                domain.domain,
                domain.blocked,
                domain.total,
                domain.block_rate * 100.0
            );
        }
    }
    if summary.avg_quality_score > 0.0 {
        println!(
            "Quality: avg {:.0}, pass rate {:.1}%",
            summary.avg_quality_score,
            summary.quality_pass_rate * 100.0
        );
    }
    Ok(())
}
