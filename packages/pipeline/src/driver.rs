//! Pipeline driver: enqueue → crawl-drain → analyze → quality-review →
//! report, as one idempotent batch job.
//!
//! Every stage reads its work set from the store, so a crashed run can
//! simply be restarted: completed work is skipped because the state
//! transitions were already recorded. A transient store failure aborts
//! the current stage with context and leaves task state consistent
//! (every transition is one guarded write).

use anyhow::{Context, Result};
use tracing::info;

use crate::analyze::Analyzer;
use crate::queue::{EnqueueOutcome, TaskQueue};
use crate::report::{summarize, CrawlSummary};
use crate::review::QualityReviewer;
use crate::store::TaskStore;
use crate::task::Campaign;
use crate::worker::{CrawlWorker, DrainStats};

const REPORT_SCAN_LIMIT: i64 = 10_000;

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// URLs to enqueue before draining; may be empty to resume a run.
    pub urls: Vec<String>,
    pub campaign: Campaign,
    pub force: bool,
    pub analyze_limit: Option<usize>,
    pub quality_review: bool,
}

#[derive(Debug)]
pub struct PipelineReport {
    pub enqueued: EnqueueOutcome,
    pub crawl: DrainStats,
    pub analyzed: usize,
    pub reviewed: usize,
    pub summary: CrawlSummary,
}

pub struct PipelineDriver<S: TaskStore> {
    queue: TaskQueue<S>,
    worker: CrawlWorker<S>,
    analyzer: Analyzer<S>,
    reviewer: QualityReviewer<S>,
}

impl<S: TaskStore> PipelineDriver<S> {
    pub fn new(
        queue: TaskQueue<S>,
        worker: CrawlWorker<S>,
        analyzer: Analyzer<S>,
        reviewer: QualityReviewer<S>,
    ) -> Self {
        Self {
            queue,
            worker,
            analyzer,
            reviewer,
        }
    }

    pub async fn run(&self, options: &PipelineOptions) -> Result<PipelineReport> {
        let enqueued = if options.urls.is_empty() {
            EnqueueOutcome::default()
        } else {
            self.queue
                .enqueue_urls(&options.urls, &options.campaign, options.force)
                .await
                .context("enqueue stage failed")?
        };
        info!(
            created = enqueued.created,
            requeued = enqueued.requeued,
            duplicates = enqueued.duplicates,
            "enqueue stage complete"
        );

        let crawl = self.worker.drain().await.context("crawl stage failed")?;
        info!(
            completed = crawl.completed,
            failed = crawl.failed,
            skipped = crawl.skipped,
            "crawl stage complete"
        );

        let analyzed = self
            .analyzer
            .run(options.analyze_limit)
            .await
            .context("analyze stage failed")?;
        info!(analyzed = analyzed, "analyze stage complete");

        let reviewed = if options.quality_review {
            let reviewed = self
                .reviewer
                .run(options.analyze_limit)
                .await
                .context("quality-review stage failed")?;
            info!(reviewed = reviewed, "quality-review stage complete");
            reviewed
        } else {
            0
        };

        let tasks = self
            .queue
            .store()
            .list_all(REPORT_SCAN_LIMIT)
            .await
            .context("report stage failed")?;
        let summary = summarize(&tasks);

        Ok(PipelineReport {
            enqueued,
            crawl,
            analyzed,
            reviewed,
            summary,
        })
    }
}
