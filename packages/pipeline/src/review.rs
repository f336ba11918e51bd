//! Quality-review stage: judge whether recorded analyses can back
//! campaign decisions.
//!
//! Reads `done` tasks with an analysis and no review yet; re-runnable
//! for the same reason the analyzer is.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::QueueError;
use crate::llm::LlmClient;
use crate::queue::TaskQueue;
use crate::store::TaskStore;
use crate::task::{Campaign, TaskStatus};

const DEFAULT_SCAN_LIMIT: i64 = 500;

pub struct QualityReviewer<S: TaskStore> {
    queue: TaskQueue<S>,
    llm: Arc<LlmClient>,
    campaign: Campaign,
}

impl<S: TaskStore> QualityReviewer<S> {
    pub fn new(queue: TaskQueue<S>, llm: Arc<LlmClient>, campaign: Campaign) -> Self {
        Self {
            queue,
            llm,
            campaign,
        }
    }

    /// Review up to `limit` analyzed tasks. Returns how many were
    /// reviewed; individual review failures are logged and skipped so
    /// one bad response does not sink the stage.
    pub async fn run(&self, limit: Option<usize>) -> Result<usize, QueueError> {
        let scan = limit.map(|l| l as i64).unwrap_or(DEFAULT_SCAN_LIMIT);
        let tasks = self
            .queue
            .store()
            .list_by_status(TaskStatus::Done, scan)
            .await?;

        let mut reviewed = 0;
        for task in tasks {
            let Some(analysis) = task.analysis.as_ref() else {
                continue;
            };
            if task.quality_review.is_some() || analysis.get("error").is_some() {
                continue;
            }
            if let Some(max) = limit {
                if reviewed >= max {
                    break;
                }
            }

            // Task-level campaign fields win over the run-level ones.
            let campaign = Campaign {
                brand: or_default(&task.brand, &self.campaign.brand),
                product: or_default(&task.product, &self.campaign.product),
                objective: or_default(&task.objective, &self.campaign.objective),
            };

            let title = task.title.as_deref().unwrap_or("");
            match self
                .llm
                .review_quality(analysis, title, &task.url, &campaign)
                .await
            {
                Ok(review) => {
                    if self.queue.record_quality_review(&task.id, &review).await? {
                        reviewed += 1;
                    }
                }
                Err(error) => {
                    warn!(task_id = %task.id, error = %error, "quality review failed");
                }
            }
        }

        info!(reviewed = reviewed, "quality review finished");
        Ok(reviewed)
    }
}

fn or_default(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
