//! Error taxonomy for the task queue core.
//!
//! `StoreUnavailable` is transient and retried by callers, never inside
//! the core. `LeaseLost` means another worker owns the task now; the
//! caller must discard its work. `ClaimConflict` is the benign
//! lost-the-race case inside `claim`.

use thiserror::Error;

/// Failures from a `TaskStore` backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

/// Failures from coordinator operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task store unavailable")]
    StoreUnavailable(#[from] StoreError),

    /// The lease was reclaimed or taken by another worker. The caller
    /// must not retry the transition; duplicate completion would corrupt
    /// results.
    #[error("lease on task {task_id} is no longer held by {worker_id}")]
    LeaseLost { task_id: String, worker_id: String },

    /// Another claimer won the compare-and-swap. Expected under
    /// concurrency; `claim` simply moves on to the next candidate.
    #[error("task {task_id} was claimed by another worker")]
    ClaimConflict { task_id: String },
}

/// Fatal configuration problems, reported once at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
