//! Maintenance sweeps: restore liveness after worker failure and recover
//! stale errors.
//!
//! Both sweeps run periodically, concurrently with live claim traffic.
//! They only touch lease-expired `running` tasks and stale `error`
//! tasks, and every reset is guarded on the observed lease so a fresh
//! claim is never clobbered.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::QueueError;
use crate::store::{LeaseGuard, TaskStore};
use crate::task::TaskStatus;

/// Counts reported back to the operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub reclaimed: usize,
    pub requeued: usize,
}

pub struct Maintenance<S: TaskStore> {
    store: Arc<S>,
}

impl<S: TaskStore> Maintenance<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Return lease-expired `running` tasks to the pending pool.
    ///
    /// Idempotent: an already-reclaimed task no longer matches the scan,
    /// and a task re-claimed in the meantime no longer matches its
    /// guard, so repeated sweeps change nothing.
    pub async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<usize, QueueError> {
        let expired = self.store.list_expired_running(now, limit).await?;

        let mut reclaimed = 0;
        for task in expired {
            let guard = LeaseGuard::of(&task);
            let mut reset = task.clone();
            reset.status = TaskStatus::Pending;
            reset.lease_owner = None;
            reset.lease_expires_at = None;
            reset.updated_at = now;

            if self.store.update_guarded(&task.id, &guard, &reset).await? {
                info!(task_id = %task.id, previous_owner = ?task.lease_owner, "reclaimed expired lease");
                reclaimed += 1;
            } else {
                debug!(task_id = %task.id, "lease changed under reclaim, skipping");
            }
        }
        Ok(reclaimed)
    }

    /// Requeue `error` tasks last updated before `cutoff`.
    ///
    /// `attempts` is preserved; tasks at or above `max_attempts` are left
    /// in `error` so they do not loop forever. `last_error` is cleared
    /// on requeue.
    pub async fn requeue_errors(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
        max_attempts: i32,
    ) -> Result<usize, QueueError> {
        let stale = self.store.list_errors_before(cutoff, limit).await?;

        let mut requeued = 0;
        for task in stale {
            if task.attempts >= max_attempts {
                debug!(
                    task_id = %task.id,
                    attempts = task.attempts,
                    "attempts ceiling reached, leaving in error"
                );
                continue;
            }
            let guard = LeaseGuard::of(&task);
            let mut reset = task.clone();
            reset.status = TaskStatus::Pending;
            reset.lease_owner = None;
            reset.lease_expires_at = None;
            reset.last_error = None;
            reset.updated_at = Utc::now();

            if self.store.update_guarded(&task.id, &guard, &reset).await? {
                info!(task_id = %task.id, attempts = task.attempts, "requeued errored task");
                requeued += 1;
            }
        }
        Ok(requeued)
    }
}
