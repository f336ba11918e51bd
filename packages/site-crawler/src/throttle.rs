//! Per-domain request throttling.
//!
//! One `DomainThrottle` instance is shared by all fetch call sites in a
//! process. It is a courtesy limiter only: state lives in memory and is
//! not coordinated across worker processes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Bounds for the per-domain delay.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    /// Starting delay between requests to the same domain.
    pub delay_base: Duration,
    /// Ceiling the delay escalates toward under block signals.
    pub delay_max: Duration,
}

/// Outcome of a fetch attempt, as far as the throttle cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Ok,
    Blocked,
}

#[derive(Debug)]
struct DomainState {
    last_access_at: Instant,
    delay: Duration,
}

/// Tracks last-access time and an adaptive delay per domain.
///
/// Block signals escalate the delay multiplicatively up to
/// `delay_max`; sustained success decays it back toward `delay_base`.
pub struct DomainThrottle {
    config: ThrottleConfig,
    domains: Mutex<HashMap<String, DomainState>>,
}

impl DomainThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// How long the caller must wait before the next request to `domain`.
    ///
    /// Zero for a domain we have never contacted; otherwise the domain's
    /// current delay minus the time already elapsed since last access.
    pub async fn delay_for(&self, domain: &str) -> Duration {
        let domains = self.domains.lock().await;
        match domains.get(domain) {
            None => Duration::ZERO,
            Some(state) => state.delay.saturating_sub(state.last_access_at.elapsed()),
        }
    }

    /// Sleep out the current delay for `domain`.
    pub async fn wait(&self, domain: &str) {
        let delay = self.delay_for(domain).await;
        if !delay.is_zero() {
            tracing::debug!(domain = %domain, delay_ms = delay.as_millis() as u64, "throttling");
            tokio::time::sleep(delay).await;
        }
    }

    /// Record a fetch attempt against `domain`.
    ///
    /// Must be called after every attempt, success or not, so the
    /// last-access clock and the adaptive delay stay honest.
    pub async fn record_access(&self, domain: &str, outcome: FetchOutcome) {
        let mut domains = self.domains.lock().await;
        let state = domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState {
                last_access_at: Instant::now(),
                delay: self.config.delay_base,
            });
        state.last_access_at = Instant::now();
        state.delay = match outcome {
            FetchOutcome::Blocked => self.config.delay_max.min(state.delay.mul_f64(1.5)),
            FetchOutcome::Ok => self.config.delay_base.max(state.delay.mul_f64(0.9)),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle(base_ms: u64, max_ms: u64) -> DomainThrottle {
        DomainThrottle::new(ThrottleConfig {
            delay_base: Duration::from_millis(base_ms),
            delay_max: Duration::from_millis(max_ms),
        })
    }

    #[tokio::test]
    async fn first_contact_has_no_delay() {
        let throttle = throttle(500, 2000);
        assert_eq!(throttle.delay_for("example.com").await, Duration::ZERO);
    }

    #[tokio::test]
    async fn delay_applies_after_access() {
        let throttle = throttle(500, 2000);
        throttle.record_access("example.com", FetchOutcome::Ok).await;
        let delay = throttle.delay_for("example.com").await;
        assert!(delay > Duration::from_millis(400));
        assert!(delay <= Duration::from_millis(500));
        // other domains are unaffected
        assert_eq!(throttle.delay_for("other.test").await, Duration::ZERO);
    }

    #[tokio::test]
    async fn blocks_escalate_and_saturate() {
        let throttle = throttle(100, 200);
        throttle
            .record_access("example.com", FetchOutcome::Blocked)
            .await;
        let first = throttle.delay_for("example.com").await;
        assert!(first > Duration::from_millis(120)); // 100 * 1.5 = 150

        for _ in 0..5 {
            throttle
                .record_access("example.com", FetchOutcome::Blocked)
                .await;
        }
        let saturated = throttle.delay_for("example.com").await;
        assert!(saturated <= Duration::from_millis(200));
        assert!(saturated > Duration::from_millis(170));
    }

    #[tokio::test]
    async fn success_decays_toward_base() {
        let throttle = throttle(100, 1000);
        for _ in 0..6 {
            throttle
                .record_access("example.com", FetchOutcome::Blocked)
                .await;
        }
        for _ in 0..50 {
            throttle.record_access("example.com", FetchOutcome::Ok).await;
        }
        let delay = throttle.delay_for("example.com").await;
        assert!(delay <= Duration::from_millis(100));
    }
}
