//! Robots-exclusion handling.
//!
//! `RobotsRules` parses a robots.txt document; `RobotsCache` fetches and
//! caches rules per domain with a TTL. The fetcher is a trait so tests
//! can run without network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use url::Url;

/// Robots behavior knobs.
#[derive(Debug, Clone)]
pub struct RobotsConfig {
    /// When false, every URL is allowed and nothing is fetched.
    pub enabled: bool,
    /// User-agent token matched against robots.txt groups.
    pub user_agent: String,
    /// How long parsed rules stay cached per domain.
    pub cache_ttl: Duration,
    /// Verdict when robots.txt cannot be fetched or parsed.
    pub fail_open: bool,
}

#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    path: String,
}

#[derive(Debug, Clone)]
struct RuleGroup {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

/// Parsed robots.txt rules.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    groups: Vec<RuleGroup>,
}

impl RobotsRules {
    /// Parse a robots.txt document.
    ///
    /// Consecutive `User-agent` lines share one group. Unknown fields
    /// (Crawl-delay, Sitemap, ...) are ignored. An empty `Disallow`
    /// contributes no rule, which means allow-everything.
    pub fn parse(content: &str) -> Self {
        let mut groups: Vec<RuleGroup> = Vec::new();
        let mut current: Option<RuleGroup> = None;
        let mut last_was_agent = false;

        for raw in content.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim().to_string();

            match field.as_str() {
                "user-agent" => {
                    if last_was_agent {
                        if let Some(group) = current.as_mut() {
                            group.agents.push(value.to_ascii_lowercase());
                        }
                    } else {
                        if let Some(group) = current.take() {
                            groups.push(group);
                        }
                        current = Some(RuleGroup {
                            agents: vec![value.to_ascii_lowercase()],
                            rules: Vec::new(),
                        });
                    }
                    last_was_agent = true;
                }
                "allow" | "disallow" => {
                    last_was_agent = false;
                    if value.is_empty() {
                        continue;
                    }
                    if let Some(group) = current.as_mut() {
                        group.rules.push(Rule {
                            allow: field == "allow",
                            path: value,
                        });
                    }
                }
                _ => {
                    last_was_agent = false;
                }
            }
        }
        if let Some(group) = current.take() {
            groups.push(group);
        }

        Self { groups }
    }

    /// Whether `user_agent` may fetch `path`.
    ///
    /// Group selection: the longest agent token contained in the
    /// user-agent wins, falling back to `*`. Rule selection: the longest
    /// matching path prefix wins; on equal length, allow wins.
    pub fn allowed(&self, user_agent: &str, path: &str) -> bool {
        let ua = user_agent.to_ascii_lowercase();

        let mut best: Option<(usize, &RuleGroup)> = None;
        let mut wildcard: Option<&RuleGroup> = None;
        for group in &self.groups {
            for agent in &group.agents {
                if agent == "*" {
                    wildcard.get_or_insert(group);
                } else if ua.contains(agent.as_str())
                    && best.map_or(true, |(len, _)| agent.len() > len)
                {
                    best = Some((agent.len(), group));
                }
            }
        }
        let Some(group) = best.map(|(_, g)| g).or(wildcard) else {
            return true;
        };

        let mut verdict: Option<(usize, bool)> = None;
        for rule in &group.rules {
            if !path.starts_with(rule.path.as_str()) {
                continue;
            }
            let len = rule.path.len();
            match verdict {
                Some((best_len, best_allow)) if best_len > len || (best_len == len && best_allow) => {}
                _ => verdict = Some((len, rule.allow)),
            }
        }
        verdict.map_or(true, |(_, allow)| allow)
    }
}

/// Fetches robots.txt for a host. Injectable for tests.
#[async_trait]
pub trait RobotsFetcher: Send + Sync {
    async fn fetch_robots(&self, host: &str) -> Result<String>;
}

/// Default fetcher: `https://{host}/robots.txt` over the shared client.
pub struct HttpRobotsFetcher {
    client: reqwest::Client,
}

impl HttpRobotsFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RobotsFetcher for HttpRobotsFetcher {
    async fn fetch_robots(&self, host: &str) -> Result<String> {
        let url = format!("https://{host}/robots.txt");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("robots.txt request failed")?
            .error_for_status()
            .context("robots.txt returned error status")?;
        response.text().await.context("failed to read robots.txt")
    }
}

struct CachedRules {
    rules: Arc<RobotsRules>,
    expires_at: Instant,
}

/// Per-domain robots rules with TTL caching.
pub struct RobotsCache {
    config: RobotsConfig,
    fetcher: Box<dyn RobotsFetcher>,
    cache: Mutex<HashMap<String, CachedRules>>,
}

impl RobotsCache {
    pub fn new(config: RobotsConfig, client: reqwest::Client) -> Self {
        Self::with_fetcher(config, Box::new(HttpRobotsFetcher::new(client)))
    }

    pub fn with_fetcher(config: RobotsConfig, fetcher: Box<dyn RobotsFetcher>) -> Self {
        Self {
            config,
            fetcher,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the configured user-agent may fetch `url`.
    ///
    /// Always true when robots is disabled. An unparseable URL is never
    /// allowed. Fetch failures follow `fail_open` and are not cached, so
    /// a transient failure does not pin the verdict for the TTL.
    pub async fn allowed(&self, url: &str) -> bool {
        if !self.config.enabled {
            return true;
        }
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str().map(|h| h.to_ascii_lowercase()) else {
            return false;
        };

        let target = match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        };

        match self.rules_for(&host).await {
            Some(rules) => rules.allowed(&self.config.user_agent, &target),
            None => self.config.fail_open,
        }
    }

    async fn rules_for(&self, host: &str) -> Option<Arc<RobotsRules>> {
        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.get(host) {
                if cached.expires_at > Instant::now() {
                    return Some(cached.rules.clone());
                }
            }
        }

        // Fetch outside the lock; concurrent misses may fetch twice,
        // which is harmless.
        let content = match self.fetcher.fetch_robots(host).await {
            Ok(content) => content,
            Err(error) => {
                tracing::debug!(host = %host, error = %error, "robots.txt fetch failed");
                return None;
            }
        };
        let rules = Arc::new(RobotsRules::parse(&content));

        let mut cache = self.cache.lock().await;
        cache.insert(
            host.to_string(),
            CachedRules {
                rules: rules.clone(),
                expires_at: Instant::now() + self.config.cache_ttl,
            },
        );
        Some(rules)
    }
}
