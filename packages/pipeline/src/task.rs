//! Task model for crawl work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;

use site_crawler::normalize_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Done,
    Error,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Campaign metadata attached to every task of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub brand: String,
    pub product: String,
    pub objective: String,
}

impl Campaign {
    pub fn is_empty(&self) -> bool {
        self.brand.is_empty() && self.product.is_empty() && self.objective.is_empty()
    }

    /// Key mixed into the task id so the same URL can be researched for
    /// different campaigns. Empty campaigns contribute nothing, keeping
    /// ids stable for plain URL runs.
    pub fn key(&self) -> String {
        if self.is_empty() {
            String::new()
        } else {
            format!("{}|{}|{}", self.brand, self.product, self.objective)
        }
    }
}

/// Stable task id: SHA-256 of the normalized URL plus campaign key.
pub fn derive_task_id(normalized_url: &str, campaign_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_url.as_bytes());
    if !campaign_key.is_empty() {
        hasher.update(b"\n");
        hasher.update(campaign_key.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// One unit of crawl work.
///
/// Never physically deleted by the core; the analyze, quality-review,
/// and report stages keep reading completed tasks.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: String,
    pub url: String,
    pub normalized_url: String,

    pub brand: String,
    pub product: String,
    pub objective: String,

    pub status: TaskStatus,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,

    // Fetch results
    pub local_path: Option<String>,
    pub title: Option<String>,
    pub response_status: Option<i32>,
    pub block_signals: Vec<String>,
    pub blocked_suspected: bool,
    pub fetch_latency_ms: Option<i64>,

    // Stage results
    pub analysis: Option<serde_json::Value>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub quality_review: Option<serde_json::Value>,
    pub quality_reviewed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(url: &str, campaign: &Campaign) -> Self {
        let normalized = normalize_url(url);
        let id = derive_task_id(&normalized, &campaign.key());
        let now = Utc::now();
        Self {
            id,
            url: url.trim().to_string(),
            normalized_url: normalized,
            brand: campaign.brand.clone(),
            product: campaign.product.clone(),
            objective: campaign.objective.clone(),
            status: TaskStatus::Pending,
            lease_owner: None,
            lease_expires_at: None,
            attempts: 0,
            last_error: None,
            local_path: None,
            title: None,
            response_status: None,
            block_signals: Vec::new(),
            blocked_suspected: false,
            fetch_latency_ms: None,
            analysis: None,
            analyzed_at: None,
            quality_review: None,
            quality_reviewed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the worker currently named by `worker_id` holds a live
    /// lease at instant `now`.
    pub fn holds_lease(&self, worker_id: &str, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Running
            && self.lease_owner.as_deref() == Some(worker_id)
            && self.lease_expires_at.map_or(false, |at| at > now)
    }
}

/// Normalized sentiment analysis for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// 0..=10
    pub sentiment_score: f64,
    pub sentiment_summary: String,
    pub key_discussions: Vec<String>,
    pub buying_intent: String,
}

impl Analysis {
    /// Coerce a loosely-shaped LLM payload into the normalized form.
    /// Scores clamp to 0..=10; a scalar `key_discussions` becomes a
    /// single-element list.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let sentiment_score = value
            .get("sentiment_score")
            .and_then(coerce_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 10.0);
        let sentiment_summary = string_field(value, "sentiment_summary");
        let key_discussions = string_list(value.get("key_discussions"));
        let buying_intent = string_field(value, "buying_intent");
        Self {
            sentiment_score,
            sentiment_summary,
            key_discussions,
            buying_intent,
        }
    }

    /// Canned result for dry runs and the mock provider.
    pub fn mock() -> Self {
        Self {
            sentiment_score: 7.5,
            sentiment_summary: "dry run: LLM call skipped".to_string(),
            key_discussions: vec![
                "sample discussion".to_string(),
                "mock".to_string(),
            ],
            buying_intent: "medium".to_string(),
        }
    }
}

/// Normalized quality-review verdict for one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReview {
    /// 0..=100
    pub quality_score: i32,
    pub quality_pass: bool,
    pub issues: Vec<String>,
    pub notes: String,
}

impl QualityReview {
    pub fn from_value(value: &serde_json::Value) -> Self {
        let quality_score = value
            .get("quality_score")
            .and_then(coerce_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 100.0) as i32;
        let quality_pass = match value.get("quality_pass") {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => {
                matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "y")
            }
            _ => quality_score >= 70,
        };
        Self {
            quality_score,
            quality_pass,
            issues: string_list(value.get("issues")),
            notes: string_field(value, "notes"),
        }
    }

    pub fn mock() -> Self {
        Self {
            quality_score: 85,
            quality_pass: true,
            issues: Vec::new(),
            notes: "dry run: LLM call skipped".to_string(),
        }
    }
}

fn coerce_f64(value: &serde_json::Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn string_field(value: &serde_json::Value, key: &str) -> String {
    match value.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_task_starts_pending_and_unleased() {
        let task = Task::new("https://example.com/page", &Campaign::default());
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.lease_owner.is_none());
        assert!(task.lease_expires_at.is_none());
        assert_eq!(task.attempts, 0);
    }

    #[test]
    fn equivalent_urls_share_an_id() {
        let campaign = Campaign::default();
        let a = Task::new("https://Example.com/page/", &campaign);
        let b = Task::new("https://example.com/page", &campaign);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn campaign_key_changes_the_id() {
        let plain = Task::new("https://example.com/page", &Campaign::default());
        let branded = Task::new(
            "https://example.com/page",
            &Campaign {
                brand: "Acme".to_string(),
                product: "Widget".to_string(),
                objective: "launch".to_string(),
            },
        );
        assert_ne!(plain.id, branded.id);
    }

    #[test]
    fn holds_lease_requires_running_owner_and_future_expiry() {
        let mut task = Task::new("https://example.com/", &Campaign::default());
        let now = Utc::now();
        assert!(!task.holds_lease("w1", now));

        task.status = TaskStatus::Running;
        task.lease_owner = Some("w1".to_string());
        task.lease_expires_at = Some(now + chrono::Duration::seconds(60));
        assert!(task.holds_lease("w1", now));
        assert!(!task.holds_lease("w2", now));
        assert!(!task.holds_lease("w1", now + chrono::Duration::seconds(120)));
    }

    #[test]
    fn analysis_clamps_score_and_coerces_shapes() {
        let analysis = Analysis::from_value(&json!({
            "sentiment_score": "14",
            "sentiment_summary": "very positive",
            "key_discussions": "single point",
            "buying_intent": "high",
        }));
        assert_eq!(analysis.sentiment_score, 10.0);
        assert_eq!(analysis.key_discussions, vec!["single point"]);
        assert_eq!(analysis.buying_intent, "high");
    }

    #[test]
    fn analysis_defaults_on_garbage() {
        let analysis = Analysis::from_value(&json!({"sentiment_score": {"oops": 1}}));
        assert_eq!(analysis.sentiment_score, 0.0);
        assert!(analysis.key_discussions.is_empty());
    }

    #[test]
    fn quality_pass_derives_from_score_when_absent() {
        let passing = QualityReview::from_value(&json!({"quality_score": 82}));
        assert!(passing.quality_pass);
        let failing = QualityReview::from_value(&json!({"quality_score": 40}));
        assert!(!failing.quality_pass);
    }

    #[test]
    fn quality_accepts_stringly_booleans() {
        let review = QualityReview::from_value(&json!({
            "quality_score": 10,
            "quality_pass": "yes",
            "issues": ["thin content"],
        }));
        assert!(review.quality_pass);
        assert_eq!(review.issues, vec!["thin content"]);
    }
}
