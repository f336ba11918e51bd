//! Coordinator and maintenance behavior against the in-memory store.
//!
//! These suites pin down the lease protocol: at most one worker holds a
//! live lease, losers of a claim race get fewer tasks (never errors),
//! and stale workers get `LeaseLost` instead of silently corrupting
//! results.

use std::sync::Arc;

use chrono::{Duration, Utc};

use pipeline_core::maintenance::Maintenance;
use pipeline_core::{
    Campaign, CrawlOutcome, MemoryTaskStore, QueueError, Task, TaskQueue, TaskStatus, TaskStore,
};

fn queue_with_store() -> (TaskQueue<MemoryTaskStore>, Arc<MemoryTaskStore>) {
    let store = Arc::new(MemoryTaskStore::new());
    (TaskQueue::new(store.clone()), store)
}

async fn enqueue(queue: &TaskQueue<MemoryTaskStore>, urls: &[&str]) {
    let urls: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
    queue
        .enqueue_urls(&urls, &Campaign::default(), false)
        .await
        .expect("enqueue failed");
}

/// A running task whose lease expired in the past.
fn expired_running_task(url: &str, owner: &str, expired_secs_ago: i64) -> Task {
    let mut task = Task::new(url, &Campaign::default());
    task.status = TaskStatus::Running;
    task.lease_owner = Some(owner.to_string());
    task.lease_expires_at = Some(Utc::now() - Duration::seconds(expired_secs_ago));
    task.attempts = 1;
    task
}

// ============================================================================
// Enqueue
// ============================================================================

#[tokio::test]
async fn enqueue_deduplicates_on_task_id() {
    let (queue, store) = queue_with_store();

    let first = queue
        .enqueue_urls(
            &["https://example.com/page".to_string()],
            &Campaign::default(),
            false,
        )
        .await
        .unwrap();
    assert_eq!(first.created, 1);

    // same page, different spelling
    let second = queue
        .enqueue_urls(
            &["https://Example.com/page/".to_string()],
            &Campaign::default(),
            false,
        )
        .await
        .unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.duplicates, 1);

    assert_eq!(store.list_all(100).await.unwrap().len(), 1);
}

#[tokio::test]
async fn force_enqueue_resets_done_task_to_pending() {
    let (queue, store) = queue_with_store();

    let mut done = Task::new("https://example.com/page", &Campaign::default());
    done.status = TaskStatus::Done;
    done.local_path = Some("/tmp/cached.html".to_string());
    done.attempts = 2;
    store.put(done.clone()).await;

    let outcome = queue
        .enqueue_urls(&[done.url.clone()], &Campaign::default(), true)
        .await
        .unwrap();
    assert_eq!(outcome.requeued, 1);

    let task = store.get(&done.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.lease_owner.is_none());
    assert!(task.lease_expires_at.is_none());
    assert!(task.last_error.is_none());
    // attempts survive the reset
    assert_eq!(task.attempts, 2);
}

#[tokio::test]
async fn enqueue_without_force_leaves_existing_task_alone() {
    let (queue, store) = queue_with_store();
    enqueue(&queue, &["https://example.com/page"]).await;

    let claimed = queue.claim(1, 60, "worker-a").await.unwrap();
    let outcome = queue
        .enqueue_urls(
            &["https://example.com/page".to_string()],
            &Campaign::default(),
            false,
        )
        .await
        .unwrap();
    assert_eq!(outcome.duplicates, 1);

    let task = store.get(&claimed[0].id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.lease_owner.as_deref(), Some("worker-a"));
}

// ============================================================================
// Claim
// ============================================================================

#[tokio::test]
async fn claim_marks_tasks_running_with_lease() {
    let (queue, _store) = queue_with_store();
    enqueue(&queue, &["https://a.test/1", "https://a.test/2", "https://a.test/3"]).await;

    let before = Utc::now();
    let claimed = queue.claim(2, 60, "worker-a").await.unwrap();
    assert_eq!(claimed.len(), 2);
    for task in &claimed {
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.lease_owner.as_deref(), Some("worker-a"));
        assert!(task.lease_expires_at.unwrap() > before + Duration::seconds(50));
        assert_eq!(task.attempts, 1);
    }
}

#[tokio::test]
async fn sequential_claims_split_the_queue() {
    let (queue, _store) = queue_with_store();
    enqueue(&queue, &["https://a.test/1", "https://a.test/2", "https://a.test/3"]).await;

    let a = queue.claim(2, 60, "worker-a").await.unwrap();
    let b = queue.claim(2, 60, "worker-b").await.unwrap();

    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 1);
    assert!(a.iter().all(|t| b.iter().all(|u| u.id != t.id)));
}

#[tokio::test]
async fn concurrent_claims_never_share_a_task() {
    let (queue, _store) = queue_with_store();
    enqueue(
        &queue,
        &[
            "https://a.test/1",
            "https://a.test/2",
            "https://a.test/3",
            "https://a.test/4",
        ],
    )
    .await;

    let (a, b) = tokio::join!(queue.claim(3, 60, "worker-a"), queue.claim(3, 60, "worker-b"));
    let a = a.unwrap();
    let b = b.unwrap();

    for task in &a {
        assert!(b.iter().all(|other| other.id != task.id));
    }
    assert!(a.len() + b.len() <= 4);
}

#[tokio::test]
async fn claim_never_returns_done_tasks() {
    let (queue, store) = queue_with_store();

    let mut done = Task::new("https://a.test/done", &Campaign::default());
    done.status = TaskStatus::Done;
    store.put(done).await;
    enqueue(&queue, &["https://a.test/pending"]).await;

    let claimed = queue.claim(10, 60, "worker-a").await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].url, "https://a.test/pending");
}

#[tokio::test]
async fn claim_returns_oldest_first() {
    let (queue, _store) = queue_with_store();
    enqueue(&queue, &["https://a.test/first"]).await;
    enqueue(&queue, &["https://a.test/second"]).await;

    let claimed = queue.claim(1, 60, "worker-a").await.unwrap();
    assert_eq!(claimed[0].url, "https://a.test/first");
}

#[tokio::test]
async fn claim_picks_up_expired_running_tasks() {
    let (queue, store) = queue_with_store();
    store
        .put(expired_running_task("https://a.test/stuck", "worker-dead", 30))
        .await;

    let claimed = queue.claim(1, 60, "worker-b").await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].lease_owner.as_deref(), Some("worker-b"));
    assert!(claimed[0].lease_expires_at.unwrap() > Utc::now());
    // claim attempts accumulate across owners
    assert_eq!(claimed[0].attempts, 2);
}

#[tokio::test]
async fn claim_leaves_fresh_leases_alone() {
    let (queue, store) = queue_with_store();

    let mut fresh = Task::new("https://a.test/busy", &Campaign::default());
    fresh.status = TaskStatus::Running;
    fresh.lease_owner = Some("worker-a".to_string());
    fresh.lease_expires_at = Some(Utc::now() + Duration::seconds(600));
    store.put(fresh).await;

    let claimed = queue.claim(10, 60, "worker-b").await.unwrap();
    assert!(claimed.is_empty());
}

// ============================================================================
// Complete / Fail
// ============================================================================

#[tokio::test]
async fn complete_sets_done_and_clears_lease() {
    let (queue, store) = queue_with_store();
    enqueue(&queue, &["https://a.test/1"]).await;
    let claimed = queue.claim(1, 60, "worker-a").await.unwrap();

    queue
        .complete(
            &claimed[0].id,
            "worker-a",
            CrawlOutcome {
                local_path: Some("/tmp/raw/page.html".to_string()),
                title: Some("Page".to_string()),
                response_status: Some(200),
                block_signals: Vec::new(),
                fetch_latency_ms: Some(42),
            },
        )
        .await
        .unwrap();

    let task = store.get(&claimed[0].id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert!(task.lease_owner.is_none());
    assert!(task.lease_expires_at.is_none());
    assert_eq!(task.local_path.as_deref(), Some("/tmp/raw/page.html"));
    assert_eq!(task.response_status, Some(200));
    assert!(!task.blocked_suspected);
}

#[tokio::test]
async fn complete_by_non_owner_fails_without_mutating() {
    let (queue, store) = queue_with_store();
    enqueue(&queue, &["https://a.test/1"]).await;
    let claimed = queue.claim(1, 60, "worker-a").await.unwrap();

    let result = queue
        .complete(&claimed[0].id, "worker-b", CrawlOutcome::default())
        .await;
    assert!(matches!(result, Err(QueueError::LeaseLost { .. })));

    let task = store.get(&claimed[0].id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.lease_owner.as_deref(), Some("worker-a"));
}

#[tokio::test]
async fn complete_after_reclaim_fails_with_lease_lost() {
    let (queue, store) = queue_with_store();
    let maintenance = Maintenance::new(store.clone());

    enqueue(&queue, &["https://a.test/1"]).await;
    let claimed = queue.claim(1, 60, "worker-a").await.unwrap();

    // lease expires, maintenance hands the task back to the pool
    let after_expiry = Utc::now() + Duration::seconds(120);
    assert_eq!(maintenance.reclaim_expired(after_expiry, 10).await.unwrap(), 1);

    let result = queue
        .complete(
            &claimed[0].id,
            "worker-a",
            CrawlOutcome {
                local_path: Some("/tmp/raw/stale.html".to_string()),
                ..CrawlOutcome::default()
            },
        )
        .await;
    assert!(matches!(result, Err(QueueError::LeaseLost { .. })));

    let task = store.get(&claimed[0].id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.local_path.is_none());
}

#[tokio::test]
async fn complete_with_expired_lease_fails() {
    let (queue, store) = queue_with_store();
    store
        .put(expired_running_task("https://a.test/1", "worker-a", 30))
        .await;
    let id = store.list_all(1).await.unwrap()[0].id.clone();

    let result = queue.complete(&id, "worker-a", CrawlOutcome::default()).await;
    assert!(matches!(result, Err(QueueError::LeaseLost { .. })));
}

#[tokio::test]
async fn fail_sets_error_and_keeps_attempts() {
    let (queue, store) = queue_with_store();
    enqueue(&queue, &["https://a.test/1"]).await;
    let claimed = queue.claim(1, 60, "worker-a").await.unwrap();

    queue
        .fail(&claimed[0].id, "worker-a", "connection reset")
        .await
        .unwrap();

    let task = store.get(&claimed[0].id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.last_error.as_deref(), Some("connection reset"));
    assert!(task.lease_owner.is_none());
    assert_eq!(task.attempts, 1);
}

// ============================================================================
// Maintenance
// ============================================================================

#[tokio::test]
async fn reclaim_expired_is_idempotent() {
    let (queue, store) = queue_with_store();
    let maintenance = Maintenance::new(store.clone());

    enqueue(&queue, &["https://a.test/1", "https://a.test/2"]).await;
    queue.claim(2, 60, "worker-a").await.unwrap();

    let after_expiry = Utc::now() + Duration::seconds(120);
    assert_eq!(maintenance.reclaim_expired(after_expiry, 10).await.unwrap(), 2);
    // second sweep finds nothing left to reclaim
    assert_eq!(maintenance.reclaim_expired(after_expiry, 10).await.unwrap(), 0);

    for task in store.list_all(10).await.unwrap() {
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.lease_owner.is_none());
    }
}

#[tokio::test]
async fn reclaim_leaves_fresh_leases_alone() {
    let (queue, store) = queue_with_store();
    let maintenance = Maintenance::new(store.clone());

    enqueue(&queue, &["https://a.test/1"]).await;
    let claimed = queue.claim(1, 3600, "worker-a").await.unwrap();

    assert_eq!(maintenance.reclaim_expired(Utc::now(), 10).await.unwrap(), 0);
    let task = store.get(&claimed[0].id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Running);
}

#[tokio::test]
async fn reclaimed_task_is_claimable_by_another_worker() {
    let (queue, store) = queue_with_store();
    let maintenance = Maintenance::new(store.clone());

    enqueue(&queue, &["https://a.test/1"]).await;
    queue.claim(1, 1, "worker-a").await.unwrap();

    // two seconds later the lease has expired
    let later = Utc::now() + Duration::seconds(2);
    assert_eq!(maintenance.reclaim_expired(later, 10).await.unwrap(), 1);

    let claimed = queue.claim(1, 60, "worker-b").await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].lease_owner.as_deref(), Some("worker-b"));
}

#[tokio::test]
async fn requeue_errors_resets_stale_tasks() {
    let (_queue, store) = queue_with_store();
    let maintenance = Maintenance::new(store.clone());

    let mut stale = Task::new("https://a.test/1", &Campaign::default());
    stale.status = TaskStatus::Error;
    stale.last_error = Some("timeout".to_string());
    stale.attempts = 2;
    stale.updated_at = Utc::now() - Duration::hours(25);
    store.put(stale.clone()).await;

    let cutoff = Utc::now() - Duration::hours(24);
    assert_eq!(maintenance.requeue_errors(cutoff, 10, 5).await.unwrap(), 1);

    let task = store.get(&stale.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.last_error.is_none());
    assert_eq!(task.attempts, 2);
}

#[tokio::test]
async fn requeue_errors_skips_recent_failures() {
    let (queue, store) = queue_with_store();
    let maintenance = Maintenance::new(store.clone());

    enqueue(&queue, &["https://a.test/1"]).await;
    let claimed = queue.claim(1, 60, "worker-a").await.unwrap();
    queue.fail(&claimed[0].id, "worker-a", "boom").await.unwrap();

    let cutoff = Utc::now() - Duration::hours(24);
    assert_eq!(maintenance.requeue_errors(cutoff, 10, 5).await.unwrap(), 0);
}

#[tokio::test]
async fn requeue_errors_respects_attempts_ceiling() {
    let (_queue, store) = queue_with_store();
    let maintenance = Maintenance::new(store.clone());

    let mut exhausted = Task::new("https://a.test/1", &Campaign::default());
    exhausted.status = TaskStatus::Error;
    exhausted.attempts = 5;
    exhausted.updated_at = Utc::now() - Duration::hours(48);
    store.put(exhausted.clone()).await;

    let cutoff = Utc::now() - Duration::hours(24);
    assert_eq!(maintenance.requeue_errors(cutoff, 10, 5).await.unwrap(), 0);

    let task = store.get(&exhausted.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.attempts, 5);
}

// ============================================================================
// Stage recording
// ============================================================================

#[tokio::test]
async fn record_analysis_is_write_once() {
    let (queue, store) = queue_with_store();
    enqueue(&queue, &["https://a.test/1"]).await;
    let claimed = queue.claim(1, 60, "worker-a").await.unwrap();
    queue
        .complete(&claimed[0].id, "worker-a", CrawlOutcome::default())
        .await
        .unwrap();

    let analysis = pipeline_core::Analysis::mock();
    assert!(queue.record_analysis(&claimed[0].id, &analysis).await.unwrap());
    // second write is refused, the first result stands
    assert!(!queue.record_analysis(&claimed[0].id, &analysis).await.unwrap());

    let task = store.get(&claimed[0].id).await.unwrap().unwrap();
    assert!(task.analysis.is_some());
    assert!(task.analyzed_at.is_some());
}

#[tokio::test]
async fn record_analysis_requires_done_status() {
    let (queue, _store) = queue_with_store();
    enqueue(&queue, &["https://a.test/1"]).await;
    let claimed = queue.claim(1, 60, "worker-a").await.unwrap();

    // still running: nothing recorded
    let analysis = pipeline_core::Analysis::mock();
    assert!(!queue.record_analysis(&claimed[0].id, &analysis).await.unwrap());
}
