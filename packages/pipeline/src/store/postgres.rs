//! PostgreSQL-backed task store.
//!
//! Guarded updates express the compare-and-swap in the `WHERE` clause;
//! the affected-row count reports whether the guard held. `IS NOT
//! DISTINCT FROM` makes the null lease fields compare like values.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{LeaseGuard, TaskStore};
use crate::error::StoreError;
use crate::task::{Task, TaskStatus};

const TASK_COLUMNS: &str = "\
    id, url, normalized_url, brand, product, objective, status, \
    lease_owner, lease_expires_at, attempts, last_error, \
    local_path, title, response_status, block_signals, blocked_suspected, fetch_latency_ms, \
    analysis, analyzed_at, quality_review, quality_reviewed_at, \
    created_at, updated_at";

pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run migrations, the standard binary startup path.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("failed to connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
        let task = sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    async fn insert(&self, task: &Task) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                id, url, normalized_url, brand, product, objective, status,
                lease_owner, lease_expires_at, attempts, last_error,
                local_path, title, response_status, block_signals, blocked_suspected, fetch_latency_ms,
                analysis, analyzed_at, quality_review, quality_reviewed_at,
                created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7,
                $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17,
                $18, $19, $20, $21,
                $22, $23
            )
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&task.id)
        .bind(&task.url)
        .bind(&task.normalized_url)
        .bind(&task.brand)
        .bind(&task.product)
        .bind(&task.objective)
        .bind(task.status)
        .bind(&task.lease_owner)
        .bind(task.lease_expires_at)
        .bind(task.attempts)
        .bind(&task.last_error)
        .bind(&task.local_path)
        .bind(&task.title)
        .bind(task.response_status)
        .bind(&task.block_signals)
        .bind(task.blocked_suspected)
        .bind(task.fetch_latency_ms)
        .bind(&task.analysis)
        .bind(task.analyzed_at)
        .bind(&task.quality_review)
        .bind(task.quality_reviewed_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_guarded(
        &self,
        id: &str,
        guard: &LeaseGuard,
        task: &Task,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                url = $2, normalized_url = $3, brand = $4, product = $5, objective = $6,
                status = $7, lease_owner = $8, lease_expires_at = $9,
                attempts = $10, last_error = $11,
                local_path = $12, title = $13, response_status = $14,
                block_signals = $15, blocked_suspected = $16, fetch_latency_ms = $17,
                analysis = $18, analyzed_at = $19, quality_review = $20, quality_reviewed_at = $21,
                updated_at = $22
            WHERE id = $1
              AND status = $23
              AND lease_owner IS NOT DISTINCT FROM $24
              AND lease_expires_at IS NOT DISTINCT FROM $25
            "#,
        )
        .bind(id)
        .bind(&task.url)
        .bind(&task.normalized_url)
        .bind(&task.brand)
        .bind(&task.product)
        .bind(&task.objective)
        .bind(task.status)
        .bind(&task.lease_owner)
        .bind(task.lease_expires_at)
        .bind(task.attempts)
        .bind(&task.last_error)
        .bind(&task.local_path)
        .bind(&task.title)
        .bind(task.response_status)
        .bind(&task.block_signals)
        .bind(task.blocked_suspected)
        .bind(task.fetch_latency_ms)
        .bind(&task.analysis)
        .bind(task.analyzed_at)
        .bind(&task.quality_review)
        .bind(task.quality_reviewed_at)
        .bind(task.updated_at)
        .bind(guard.status)
        .bind(&guard.lease_owner)
        .bind(guard.lease_expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_claim_candidates(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError> {
        let query = format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE status = 'pending'
               OR (status = 'running' AND lease_expires_at < $1)
            ORDER BY created_at ASC
            LIMIT $2
            "#
        );
        let tasks = sqlx::query_as::<_, Task>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(tasks)
    }

    async fn list_by_status(
        &self,
        status: TaskStatus,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError> {
        let query = format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE status = $1
            ORDER BY created_at ASC
            LIMIT $2
            "#
        );
        let tasks = sqlx::query_as::<_, Task>(&query)
            .bind(status)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(tasks)
    }

    async fn list_expired_running(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError> {
        let query = format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE status = 'running' AND lease_expires_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#
        );
        let tasks = sqlx::query_as::<_, Task>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(tasks)
    }

    async fn list_errors_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError> {
        let query = format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE status = 'error' AND updated_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#
        );
        let tasks = sqlx::query_as::<_, Task>(&query)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(tasks)
    }

    async fn list_all(&self, limit: i64) -> Result<Vec<Task>, StoreError> {
        let query = format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at ASC LIMIT $1"
        );
        let tasks = sqlx::query_as::<_, Task>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(tasks)
    }
}
