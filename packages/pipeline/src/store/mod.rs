//! Task store contract.
//!
//! The store is the single source of truth; every state transition is one
//! atomic guarded update. `update_guarded` is the compare-and-swap
//! primitive: it replaces the stored document only if the guard matches
//! the stored status and lease fields, so concurrent claimers, workers,
//! and the maintenance job can never lose each other's writes.

mod memory;
mod postgres;

pub use memory::MemoryTaskStore;
pub use postgres::PgTaskStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::task::{Task, TaskStatus};

/// Observed lease state a guarded update is conditioned on.
///
/// All three fields are compared exactly. Guards are built from a task
/// document previously read from the store, so a mismatch always means
/// someone else transitioned the task in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseGuard {
    pub status: TaskStatus,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl LeaseGuard {
    pub fn of(task: &Task) -> Self {
        Self {
            status: task.status,
            lease_owner: task.lease_owner.clone(),
            lease_expires_at: task.lease_expires_at,
        }
    }
}

/// Access contract for the task collection.
///
/// All listing methods order by `created_at` ascending (oldest first)
/// and honor `limit`. Calls are blocking round-trips to the backend;
/// callers must not hold locks across them.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Read one task by id.
    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError>;

    /// Insert a new task. Returns false (and writes nothing) when the id
    /// already exists; this is the dedup probe.
    async fn insert(&self, task: &Task) -> Result<bool, StoreError>;

    /// Compare-and-swap: replace the stored document with `task` iff
    /// `guard` matches the stored status/lease fields. Returns false on
    /// mismatch or missing id.
    async fn update_guarded(
        &self,
        id: &str,
        guard: &LeaseGuard,
        task: &Task,
    ) -> Result<bool, StoreError>;

    /// Tasks eligible for claiming: `pending`, or `running` with a lease
    /// that expired before `now`.
    async fn list_claim_candidates(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError>;

    async fn list_by_status(
        &self,
        status: TaskStatus,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError>;

    /// `running` tasks whose lease expired before `now`.
    async fn list_expired_running(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError>;

    /// `error` tasks last updated before `cutoff`.
    async fn list_errors_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError>;

    /// Every task, for reporting.
    async fn list_all(&self, limit: i64) -> Result<Vec<Task>, StoreError>;
}
