//! HTTP page fetching.
//!
//! `PageFetcher` wraps a reqwest client with browser-like headers. The
//! `FetchPage` trait is the seam the crawl worker is written against, so
//! pipeline tests run with a canned fetcher instead of the network.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::block::detect_block_signals;

/// HTTP client knobs.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
}

/// A fetched page with the telemetry the pipeline records.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub html: String,
    pub title: Option<String>,
    pub latency_ms: i64,
    pub block_signals: Vec<String>,
}

impl FetchedPage {
    pub fn blocked_suspected(&self) -> bool {
        !self.block_signals.is_empty()
    }
}

/// Fetch a single page.
///
/// Implementations return `Ok` for any HTTP response (the status and
/// block signals are part of the result) and `Err` only for transport
/// failures: DNS, connect, timeout, body read.
#[async_trait]
pub trait FetchPage: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

/// reqwest-backed fetcher.
pub struct PageFetcher {
    client: reqwest::Client,
}

impl PageFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
                .parse()
                .context("invalid Accept header")?,
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            "en-US,en;q=0.5".parse().context("invalid Accept-Language header")?,
        );

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Share the underlying client (robots.txt fetches reuse it).
    pub fn client(&self) -> reqwest::Client {
        self.client.clone()
    }

    fn extract_title(html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let selector = Selector::parse("title").ok()?;
        document
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

#[async_trait]
impl FetchPage for PageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request failed for {url}"))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let html = response
            .text()
            .await
            .with_context(|| format!("failed to read body for {url}"))?;
        let latency_ms = started.elapsed().as_millis() as i64;

        let block_signals = detect_block_signals(&html, Some(status));
        let title = Self::extract_title(&html);

        tracing::debug!(
            url = %final_url,
            status = status,
            latency_ms = latency_ms,
            blocked = !block_signals.is_empty(),
            "fetched page"
        );

        Ok(FetchedPage {
            url: final_url,
            status,
            html,
            title,
            latency_ms,
            block_signals,
        })
    }
}
