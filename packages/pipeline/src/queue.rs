//! Task queue coordinator.
//!
//! Distributes pending tasks across concurrent workers with at-most-one
//! active lease per task. Every transition is a single guarded update
//! against the store; a plain read-then-write is never used.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::error::QueueError;
use crate::store::{LeaseGuard, TaskStore};
use crate::task::{Analysis, Campaign, QualityReview, Task, TaskStatus};

/// Fetch results recorded on completion.
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    pub local_path: Option<String>,
    pub title: Option<String>,
    pub response_status: Option<i32>,
    pub block_signals: Vec<String>,
    pub fetch_latency_ms: Option<i64>,
}

/// Counts from one enqueue batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// New task records created.
    pub created: usize,
    /// Existing records force-reset to pending.
    pub requeued: usize,
    /// Existing records left untouched.
    pub duplicates: usize,
}

pub struct TaskQueue<S: TaskStore> {
    store: Arc<S>,
}

// Manual impl: `S` itself need not be Clone behind the Arc.
impl<S: TaskStore> Clone for TaskQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: TaskStore> TaskQueue<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Enqueue URLs, deduplicating on the derived task id.
    ///
    /// An existing id is a no-op unless `force`, which resets the stored
    /// task to `pending` and clears lease and error fields. This is the
    /// operator path for re-running `done` work.
    pub async fn enqueue_urls(
        &self,
        urls: &[String],
        campaign: &Campaign,
        force: bool,
    ) -> Result<EnqueueOutcome, QueueError> {
        let mut outcome = EnqueueOutcome::default();

        for raw in urls {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let task = Task::new(raw, campaign);

            match self.store.get(&task.id).await? {
                None => {
                    if self.store.insert(&task).await? {
                        debug!(task_id = %task.id, url = %task.url, "task created");
                        outcome.created += 1;
                    } else {
                        // lost an insert race; same as a duplicate
                        outcome.duplicates += 1;
                    }
                }
                Some(existing) if force => {
                    let guard = LeaseGuard::of(&existing);
                    let mut reset = existing.clone();
                    reset.status = TaskStatus::Pending;
                    reset.lease_owner = None;
                    reset.lease_expires_at = None;
                    reset.last_error = None;
                    reset.updated_at = Utc::now();
                    if self.store.update_guarded(&existing.id, &guard, &reset).await? {
                        debug!(task_id = %existing.id, "task force-requeued");
                        outcome.requeued += 1;
                    } else {
                        outcome.duplicates += 1;
                    }
                }
                Some(_) => outcome.duplicates += 1,
            }
        }

        info!(
            created = outcome.created,
            requeued = outcome.requeued,
            duplicates = outcome.duplicates,
            "enqueue finished"
        );
        Ok(outcome)
    }

    /// Claim up to `limit` tasks under a `lease_seconds` lease.
    ///
    /// Scans oldest-first over `pending` and lease-expired `running`
    /// tasks, then races a compare-and-swap per candidate. Losing a race
    /// is expected under concurrency: the loser logs and moves on, so
    /// the caller may simply receive fewer tasks than requested. The
    /// candidate list is oversampled 3x so conflicts can still fill the
    /// batch.
    pub async fn claim(
        &self,
        limit: usize,
        lease_seconds: i64,
        worker_id: &str,
    ) -> Result<Vec<Task>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let scan_limit = (limit.saturating_mul(3)) as i64;
        let candidates = self.store.list_claim_candidates(now, scan_limit).await?;

        let mut claimed = Vec::new();
        for candidate in candidates {
            if claimed.len() >= limit {
                break;
            }
            match self
                .try_claim_one(&candidate, lease_seconds, worker_id, now)
                .await
            {
                Ok(task) => claimed.push(task),
                Err(QueueError::ClaimConflict { task_id }) => {
                    debug!(task_id = %task_id, worker_id = %worker_id, "claim conflict, skipping");
                }
                Err(other) => return Err(other),
            }
        }

        debug!(
            worker_id = %worker_id,
            claimed = claimed.len(),
            requested = limit,
            "claim finished"
        );
        Ok(claimed)
    }

    async fn try_claim_one(
        &self,
        candidate: &Task,
        lease_seconds: i64,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Task, QueueError> {
        let guard = LeaseGuard::of(candidate);
        let mut claimed = candidate.clone();
        claimed.status = TaskStatus::Running;
        claimed.lease_owner = Some(worker_id.to_string());
        claimed.lease_expires_at = Some(now + Duration::seconds(lease_seconds));
        claimed.attempts += 1;
        claimed.updated_at = now;

        if self
            .store
            .update_guarded(&candidate.id, &guard, &claimed)
            .await?
        {
            Ok(claimed)
        } else {
            Err(QueueError::ClaimConflict {
                task_id: candidate.id.clone(),
            })
        }
    }

    /// Record a successful fetch. Requires the caller to still hold the
    /// lease; fails with `LeaseLost` otherwise, in which case the caller
    /// must discard its work.
    pub async fn complete(
        &self,
        task_id: &str,
        worker_id: &str,
        outcome: CrawlOutcome,
    ) -> Result<(), QueueError> {
        let now = Utc::now();
        let current = self.owned_task(task_id, worker_id, now).await?;

        let guard = LeaseGuard::of(&current);
        let mut done = current.clone();
        done.status = TaskStatus::Done;
        done.lease_owner = None;
        done.lease_expires_at = None;
        done.last_error = None;
        done.blocked_suspected = !outcome.block_signals.is_empty();
        done.local_path = outcome.local_path;
        done.title = outcome.title;
        done.response_status = outcome.response_status;
        done.block_signals = outcome.block_signals;
        done.fetch_latency_ms = outcome.fetch_latency_ms;
        done.updated_at = now;

        if self.store.update_guarded(task_id, &guard, &done).await? {
            Ok(())
        } else {
            Err(self.lease_lost(task_id, worker_id))
        }
    }

    /// Record a failed fetch. Same lease precondition as `complete`.
    pub async fn fail(
        &self,
        task_id: &str,
        worker_id: &str,
        error: &str,
    ) -> Result<(), QueueError> {
        let now = Utc::now();
        let current = self.owned_task(task_id, worker_id, now).await?;

        let guard = LeaseGuard::of(&current);
        let mut failed = current.clone();
        failed.status = TaskStatus::Error;
        failed.lease_owner = None;
        failed.lease_expires_at = None;
        failed.last_error = Some(error.to_string());
        failed.updated_at = now;

        if self.store.update_guarded(task_id, &guard, &failed).await? {
            Ok(())
        } else {
            Err(self.lease_lost(task_id, worker_id))
        }
    }

    /// Attach an analysis result to a completed task.
    pub async fn record_analysis(
        &self,
        task_id: &str,
        analysis: &Analysis,
    ) -> Result<bool, QueueError> {
        self.record_analysis_value(task_id, serde_json::json!(analysis))
            .await
    }

    /// Attach an analysis failure without disturbing the task lifecycle:
    /// the task stays `done` and the analyzer will not retry it.
    pub async fn record_analysis_error(
        &self,
        task_id: &str,
        error: &str,
    ) -> Result<bool, QueueError> {
        self.record_analysis_value(task_id, serde_json::json!({ "error": error }))
            .await
    }

    async fn record_analysis_value(
        &self,
        task_id: &str,
        value: serde_json::Value,
    ) -> Result<bool, QueueError> {
        let Some(current) = self.store.get(task_id).await? else {
            return Ok(false);
        };
        if current.status != TaskStatus::Done || current.analysis.is_some() {
            return Ok(false);
        }
        let now = Utc::now();
        let guard = LeaseGuard::of(&current);
        let mut updated = current.clone();
        updated.analysis = Some(value);
        updated.analyzed_at = Some(now);
        updated.updated_at = now;
        Ok(self.store.update_guarded(task_id, &guard, &updated).await?)
    }

    /// Attach a quality-review verdict to an analyzed task.
    pub async fn record_quality_review(
        &self,
        task_id: &str,
        review: &QualityReview,
    ) -> Result<bool, QueueError> {
        let Some(current) = self.store.get(task_id).await? else {
            return Ok(false);
        };
        if current.status != TaskStatus::Done
            || current.analysis.is_none()
            || current.quality_review.is_some()
        {
            return Ok(false);
        }
        let now = Utc::now();
        let guard = LeaseGuard::of(&current);
        let mut updated = current.clone();
        updated.quality_review = Some(serde_json::json!(review));
        updated.quality_reviewed_at = Some(now);
        updated.updated_at = now;
        Ok(self.store.update_guarded(task_id, &guard, &updated).await?)
    }

    async fn owned_task(
        &self,
        task_id: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Task, QueueError> {
        match self.store.get(task_id).await? {
            Some(task) if task.holds_lease(worker_id, now) => Ok(task),
            _ => Err(self.lease_lost(task_id, worker_id)),
        }
    }

    fn lease_lost(&self, task_id: &str, worker_id: &str) -> QueueError {
        QueueError::LeaseLost {
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
        }
    }
}
