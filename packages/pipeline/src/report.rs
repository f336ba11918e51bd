//! Crawl-run reporting: pure aggregation over the task collection.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::task::Task;
use site_crawler::host_of;

/// Aggregated metrics for one task collection.
#[derive(Debug, Default, Serialize)]
pub struct CrawlSummary {
    pub total: usize,
    pub status_counts: BTreeMap<String, usize>,
    pub blocked_suspected: usize,
    /// Blocked share of fetched tasks.
    pub block_rate: f64,
    pub response_status_counts: BTreeMap<String, usize>,
    pub top_block_signals: Vec<SignalCount>,
    pub avg_attempts: f64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub domain_block_rates: Vec<DomainStat>,
    pub avg_quality_score: f64,
    pub quality_pass_rate: f64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SignalCount {
    pub signal: String,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct DomainStat {
    pub domain: String,
    pub total: usize,
    pub blocked: usize,
    pub block_rate: f64,
}

pub fn summarize(tasks: &[Task]) -> CrawlSummary {
    let total = tasks.len();

    let mut status_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut response_status_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut signal_counts: HashMap<String, usize> = HashMap::new();
    let mut domain_stats: HashMap<String, (usize, usize)> = HashMap::new();

    let mut blocked = 0;
    let mut fetched = 0;
    let mut errors = 0;
    let mut attempts_total = 0i64;
    let mut latencies: Vec<i64> = Vec::new();
    let mut quality_scores: Vec<i64> = Vec::new();
    let mut quality_passes = 0;

    for task in tasks {
        *status_counts.entry(task.status.to_string()).or_default() += 1;

        if let Some(status) = task.response_status {
            fetched += 1;
            *response_status_counts.entry(status.to_string()).or_default() += 1;
            if task.blocked_suspected {
                blocked += 1;
            }
        }

        for signal in &task.block_signals {
            *signal_counts.entry(signal.clone()).or_default() += 1;
        }

        attempts_total += task.attempts as i64;

        if task.status == crate::task::TaskStatus::Error {
            errors += 1;
        }

        if let Some(latency) = task.fetch_latency_ms {
            latencies.push(latency);
        }

        if let Some(domain) = host_of(&task.url) {
            let entry = domain_stats.entry(domain).or_default();
            entry.0 += 1;
            if task.blocked_suspected {
                entry.1 += 1;
            }
        }

        if let Some(review) = task.quality_review.as_ref() {
            if let Some(score) = review.get("quality_score").and_then(|v| v.as_i64()) {
                quality_scores.push(score);
            }
            if review.get("quality_pass").and_then(|v| v.as_bool()) == Some(true) {
                quality_passes += 1;
            }
        }
    }

    latencies.sort_unstable();

    let mut top_block_signals: Vec<SignalCount> = signal_counts
        .into_iter()
        .map(|(signal, count)| SignalCount { signal, count })
        .collect();
    top_block_signals.sort_by(|a, b| b.count.cmp(&a.count).then(a.signal.cmp(&b.signal)));
    top_block_signals.truncate(10);

    let mut domain_block_rates: Vec<DomainStat> = domain_stats
        .into_iter()
        .map(|(domain, (domain_total, domain_blocked))| DomainStat {
            domain,
            total: domain_total,
            blocked: domain_blocked,
            block_rate: ratio(domain_blocked, domain_total),
        })
        .collect();
    domain_block_rates.sort_by(|a, b| {
        b.block_rate
            .partial_cmp(&a.block_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.domain.cmp(&b.domain))
    });
    domain_block_rates.truncate(10);

    CrawlSummary {
        total,
        status_counts,
        blocked_suspected: blocked,
        block_rate: ratio(blocked, fetched),
        response_status_counts,
        top_block_signals,
        avg_attempts: if total > 0 {
            attempts_total as f64 / total as f64
        } else {
            0.0
        },
        error_rate: ratio(errors, total),
        avg_latency_ms: if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<i64>() as f64 / latencies.len() as f64
        },
        p50_latency_ms: percentile(&latencies, 50.0),
        p95_latency_ms: percentile(&latencies, 95.0),
        domain_block_rates,
        avg_quality_score: if quality_scores.is_empty() {
            0.0
        } else {
            quality_scores.iter().sum::<i64>() as f64 / quality_scores.len() as f64
        },
        quality_pass_rate: ratio(quality_passes, quality_scores.len()),
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Linear-interpolated percentile over a sorted slice.
fn percentile(sorted: &[i64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let k = (sorted.len() - 1) as f64 * (pct / 100.0);
    let lower = k.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    if lower == upper {
        return sorted[lower] as f64;
    }
    let weight = k - lower as f64;
    sorted[lower] as f64 * (1.0 - weight) + sorted[upper] as f64 * weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Campaign, Task, TaskStatus};

    fn task(url: &str, status: TaskStatus) -> Task {
        let mut task = Task::new(url, &Campaign::default());
        task.status = status;
        task
    }

    #[test]
    fn percentile_interpolates() {
        let values = vec![100, 200, 300, 400];
        assert_eq!(percentile(&values, 50.0), 250.0);
        assert_eq!(percentile(&values, 0.0), 100.0);
        assert_eq!(percentile(&values, 100.0), 400.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn summarize_counts_statuses_and_rates() {
        let mut done = task("https://a.test/1", TaskStatus::Done);
        done.response_status = Some(200);
        done.fetch_latency_ms = Some(100);

        let mut blocked = task("https://a.test/2", TaskStatus::Done);
        blocked.response_status = Some(429);
        blocked.blocked_suspected = true;
        blocked.block_signals = vec!["http_429".to_string()];
        blocked.fetch_latency_ms = Some(300);

        let errored = task("https://b.test/1", TaskStatus::Error);

        let summary = summarize(&[done, blocked, errored]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.status_counts["done"], 2);
        assert_eq!(summary.status_counts["error"], 1);
        assert_eq!(summary.blocked_suspected, 1);
        assert_eq!(summary.block_rate, 0.5);
        assert!((summary.error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.avg_latency_ms, 200.0);
        assert_eq!(
            summary.top_block_signals,
            vec![SignalCount {
                signal: "http_429".to_string(),
                count: 1
            }]
        );

        let a_test = summary
            .domain_block_rates
            .iter()
            .find(|d| d.domain == "a.test")
            .unwrap();
        assert_eq!(a_test.total, 2);
        assert_eq!(a_test.blocked, 1);
    }

    #[test]
    fn summarize_reads_quality_reviews() {
        let mut reviewed = task("https://a.test/1", TaskStatus::Done);
        reviewed.quality_review =
            Some(serde_json::json!({"quality_score": 80, "quality_pass": true}));
        let mut rejected = task("https://a.test/2", TaskStatus::Done);
        rejected.quality_review =
            Some(serde_json::json!({"quality_score": 40, "quality_pass": false}));

        let summary = summarize(&[reviewed, rejected]);
        assert_eq!(summary.avg_quality_score, 60.0);
        assert_eq!(summary.quality_pass_rate, 0.5);
    }

    #[test]
    fn summarize_handles_empty_input() {
        let summary = summarize(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.block_rate, 0.0);
        assert_eq!(summary.p95_latency_ms, 0.0);
    }
}
