//! Crawl worker: claims tasks, fetches pages, records outcomes.
//!
//! The worker is a batch drainer: it claims, processes the batch
//! concurrently, and claims again until the queue is empty. Concurrency
//! safety comes entirely from the queue's guarded transitions; the
//! worker never assumes it still owns a task after `LeaseLost`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::QueueError;
use crate::queue::{CrawlOutcome, TaskQueue};
use crate::store::TaskStore;
use crate::task::Task;
use site_crawler::{
    host_of, is_domain_allowed, DomainThrottle, FetchOutcome, FetchPage, RobotsCache,
};

#[derive(Debug, Clone)]
pub struct CrawlWorkerConfig {
    pub worker_id: String,
    /// Tasks claimed per batch.
    pub claim_limit: usize,
    pub lease_seconds: i64,
    pub max_concurrent: usize,
    pub retries: u32,
    pub retry_backoff_base: Duration,
    pub retry_backoff_max: Duration,
    pub local_raw_dir: PathBuf,
    pub local_store_only: bool,
    pub allow_domains: Vec<String>,
    pub deny_domains: Vec<String>,
}

impl CrawlWorkerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            claim_limit: 50,
            lease_seconds: settings.lease_seconds,
            max_concurrent: settings.max_concurrent,
            retries: settings.retries,
            retry_backoff_base: settings.retry_backoff_base,
            retry_backoff_max: settings.retry_backoff_max,
            local_raw_dir: settings.local_raw_dir.clone(),
            local_store_only: settings.local_store_only,
            allow_domains: settings.allow_domains.clone(),
            deny_domains: settings.deny_domains.clone(),
        }
    }
}

/// Counts from one drain run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub lease_lost: usize,
}

enum TaskOutcome {
    Completed,
    Failed,
    Skipped,
    LeaseLost,
}

pub struct CrawlWorker<S: TaskStore> {
    queue: TaskQueue<S>,
    fetcher: Arc<dyn FetchPage>,
    throttle: Arc<DomainThrottle>,
    robots: Arc<RobotsCache>,
    config: CrawlWorkerConfig,
}

impl<S: TaskStore> CrawlWorker<S> {
    pub fn new(
        queue: TaskQueue<S>,
        fetcher: Arc<dyn FetchPage>,
        throttle: Arc<DomainThrottle>,
        robots: Arc<RobotsCache>,
        config: CrawlWorkerConfig,
    ) -> Self {
        Self {
            queue,
            fetcher,
            throttle,
            robots,
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Claim and process batches until the queue has nothing left.
    pub async fn drain(&self) -> Result<DrainStats, QueueError> {
        info!(
            worker_id = %self.config.worker_id,
            claim_limit = self.config.claim_limit,
            "crawl worker draining queue"
        );
        let mut stats = DrainStats::default();

        loop {
            let tasks = self
                .queue
                .claim(
                    self.config.claim_limit,
                    self.config.lease_seconds,
                    &self.config.worker_id,
                )
                .await?;
            if tasks.is_empty() {
                break;
            }
            stats.claimed += tasks.len();
            debug!(count = tasks.len(), "claimed batch");

            let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
            let mut handles = Vec::with_capacity(tasks.len());
            for task in tasks {
                let semaphore = semaphore.clone();
                handles.push(async move {
                    let _permit = semaphore.acquire().await;
                    self.process_task(task).await
                });
            }

            for result in futures::future::join_all(handles).await {
                match result? {
                    TaskOutcome::Completed => stats.completed += 1,
                    TaskOutcome::Failed => stats.failed += 1,
                    TaskOutcome::Skipped => stats.skipped += 1,
                    TaskOutcome::LeaseLost => stats.lease_lost += 1,
                }
            }
        }

        info!(
            worker_id = %self.config.worker_id,
            completed = stats.completed,
            failed = stats.failed,
            skipped = stats.skipped,
            lease_lost = stats.lease_lost,
            "drain finished"
        );
        Ok(stats)
    }

    async fn process_task(&self, task: Task) -> Result<TaskOutcome, QueueError> {
        if !is_domain_allowed(&task.url, &self.config.allow_domains, &self.config.deny_domains) {
            return self.skip(&task, "domain_not_allowed").await;
        }
        if !self.robots.allowed(&task.url).await {
            return self.skip(&task, "robots_disallow").await;
        }

        // Prefer the local cache over re-fetching when asked to.
        if self.config.local_store_only {
            if let Some(local_path) = task.local_path.as_deref() {
                if tokio::fs::try_exists(local_path).await.unwrap_or(false) {
                    debug!(task_id = %task.id, local_path = %local_path, "using cached copy");
                    let outcome = CrawlOutcome {
                        local_path: task.local_path.clone(),
                        title: task.title.clone(),
                        response_status: task.response_status,
                        block_signals: task.block_signals.clone(),
                        fetch_latency_ms: task.fetch_latency_ms,
                    };
                    return self.finish(&task, outcome).await;
                }
            }
        }

        let host = host_of(&task.url).unwrap_or_default();
        let mut last_error = String::new();

        for attempt in 1..=self.config.retries {
            self.throttle.wait(&host).await;

            match self.fetcher.fetch(&task.url).await {
                Ok(page) => {
                    let blocked = page.blocked_suspected();
                    self.throttle
                        .record_access(
                            &host,
                            if blocked { FetchOutcome::Blocked } else { FetchOutcome::Ok },
                        )
                        .await;

                    let local_path = match self.persist_html(&task, &page.html).await {
                        Ok(path) => path,
                        Err(error) => {
                            last_error = format!("failed to store page: {error}");
                            break;
                        }
                    };

                    let outcome = CrawlOutcome {
                        local_path: Some(local_path),
                        title: page.title.clone(),
                        response_status: Some(page.status as i32),
                        block_signals: page.block_signals.clone(),
                        fetch_latency_ms: Some(page.latency_ms),
                    };
                    return self.finish(&task, outcome).await;
                }
                Err(error) => {
                    last_error = error.to_string();
                    self.throttle.record_access(&host, FetchOutcome::Blocked).await;
                    warn!(
                        task_id = %task.id,
                        url = %task.url,
                        attempt = attempt,
                        error = %last_error,
                        "fetch attempt failed"
                    );
                    if attempt < self.config.retries {
                        let factor = 2u32.saturating_pow((attempt - 1).min(16));
                        let backoff = self
                            .config
                            .retry_backoff_max
                            .min(self.config.retry_backoff_base * factor);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        match self
            .queue
            .fail(&task.id, &self.config.worker_id, &last_error)
            .await
        {
            Ok(()) => Ok(TaskOutcome::Failed),
            Err(QueueError::LeaseLost { .. }) => {
                warn!(task_id = %task.id, "lease lost before failure could be recorded");
                Ok(TaskOutcome::LeaseLost)
            }
            Err(other) => Err(other),
        }
    }

    async fn skip(&self, task: &Task, reason: &str) -> Result<TaskOutcome, QueueError> {
        debug!(task_id = %task.id, url = %task.url, reason = %reason, "skipping task");
        match self
            .queue
            .fail(&task.id, &self.config.worker_id, &format!("skipped: {reason}"))
            .await
        {
            Ok(()) => Ok(TaskOutcome::Skipped),
            Err(QueueError::LeaseLost { .. }) => Ok(TaskOutcome::LeaseLost),
            Err(other) => Err(other),
        }
    }

    async fn finish(&self, task: &Task, outcome: CrawlOutcome) -> Result<TaskOutcome, QueueError> {
        match self
            .queue
            .complete(&task.id, &self.config.worker_id, outcome)
            .await
        {
            Ok(()) => Ok(TaskOutcome::Completed),
            Err(QueueError::LeaseLost { .. }) => {
                // Another worker owns the task now; our copy of the work
                // is discarded rather than retried.
                warn!(task_id = %task.id, "lease lost, discarding fetched page");
                Ok(TaskOutcome::LeaseLost)
            }
            Err(other) => Err(other),
        }
    }

    async fn persist_html(&self, task: &Task, html: &str) -> anyhow::Result<String> {
        tokio::fs::create_dir_all(&self.config.local_raw_dir).await?;
        let filename = format!("{}_{}.html", task.id, Utc::now().timestamp());
        let path = self.config.local_raw_dir.join(filename);
        tokio::fs::write(&path, html).await?;
        Ok(path.to_string_lossy().into_owned())
    }
}
