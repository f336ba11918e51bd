//! In-memory task store.
//!
//! Backs the coordinator test suites and local smoke runs. The map is
//! guarded by one async mutex, so every operation, including the guarded
//! update, is atomic with respect to concurrent callers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{LeaseGuard, TaskStore};
use crate::error::StoreError;
use crate::task::{Task, TaskStatus};

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<String, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: put a task in place regardless of existing state.
    pub async fn put(&self, task: Task) {
        let mut tasks = self.tasks.lock().await;
        tasks.insert(task.id.clone(), task);
    }

    fn sorted(mut tasks: Vec<Task>, limit: i64) -> Vec<Task> {
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if limit >= 0 {
            tasks.truncate(limit as usize);
        }
        tasks
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.lock().await;
        Ok(tasks.get(id).cloned())
    }

    async fn insert(&self, task: &Task) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.id) {
            return Ok(false);
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(true)
    }

    async fn update_guarded(
        &self,
        id: &str,
        guard: &LeaseGuard,
        task: &Task,
    ) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        match tasks.get(id) {
            Some(current) if LeaseGuard::of(current) == *guard => {
                tasks.insert(id.to_string(), task.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_claim_candidates(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.lock().await;
        let candidates = tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    || (t.status == TaskStatus::Running
                        && t.lease_expires_at.map_or(false, |at| at < now))
            })
            .cloned()
            .collect();
        Ok(Self::sorted(candidates, limit))
    }

    async fn list_by_status(
        &self,
        status: TaskStatus,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.lock().await;
        let matching = tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        Ok(Self::sorted(matching, limit))
    }

    async fn list_expired_running(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.lock().await;
        let expired = tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Running
                    && t.lease_expires_at.map_or(false, |at| at < now)
            })
            .cloned()
            .collect();
        Ok(Self::sorted(expired, limit))
    }

    async fn list_errors_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.lock().await;
        let stale = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Error && t.updated_at < cutoff)
            .cloned()
            .collect();
        Ok(Self::sorted(stale, limit))
    }

    async fn list_all(&self, limit: i64) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.lock().await;
        Ok(Self::sorted(tasks.values().cloned().collect(), limit))
    }
}
