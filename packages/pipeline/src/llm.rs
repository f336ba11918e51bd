//! LLM completion client.
//!
//! Talks to an OpenAI-compatible or Ollama chat endpoint over JSON.
//! The `mock` provider and dry-run mode return canned payloads without
//! touching the network, which is how the analyzer tests run.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;

use crate::config::{LlmApiMode, LlmSettings};
use crate::task::{Analysis, Campaign, QualityReview};

const ANALYST_SYSTEM_PROMPT: &str =
    "You are a market sentiment analyst. Respond with JSON only.";
const REVIEWER_SYSTEM_PROMPT: &str =
    "You are a strict marketing data quality reviewer. Respond with JSON only.";

pub struct LlmClient {
    settings: LlmSettings,
    http: reqwest::Client,
    dry_run: bool,
}

impl LlmClient {
    pub fn new(settings: LlmSettings, dry_run: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed to create LLM HTTP client")?;
        Ok(Self {
            settings,
            http,
            dry_run,
        })
    }

    fn is_mock(&self) -> bool {
        self.dry_run || self.settings.provider.eq_ignore_ascii_case("mock")
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("LLM_API_KEY is not set"))?;

        let payload = json!({
            "model": self.settings.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": 0.2,
            "stream": false,
        });

        let base = self.settings.base_url.trim_end_matches('/');
        let endpoint = match self.settings.api_mode {
            LlmApiMode::Ollama => format!("{base}/api/chat"),
            LlmApiMode::OpenAi => format!("{base}/v1/chat/completions"),
        };

        let mut request = self.http.post(&endpoint).json(&payload);
        request = if self.settings.api_key_header.eq_ignore_ascii_case("authorization") {
            request.bearer_auth(api_key)
        } else {
            request.header(&self.settings.api_key_header, api_key)
        };

        let data: serde_json::Value = request
            .send()
            .await
            .context("LLM request failed")?
            .error_for_status()
            .context("LLM returned error status")?
            .json()
            .await
            .context("LLM response was not JSON")?;

        let content = match self.settings.api_mode {
            LlmApiMode::Ollama => data
                .pointer("/message/content")
                .and_then(|v| v.as_str())
                .unwrap_or(""),
            LlmApiMode::OpenAi => data
                .pointer("/choices/0/message/content")
                .and_then(|v| v.as_str())
                .unwrap_or(""),
        };
        Ok(content.to_string())
    }

    /// Sentiment-analyze extracted page text.
    pub async fn analyze(&self, text: &str, title: &str, url: &str) -> Result<Analysis> {
        if text.is_empty() {
            bail!("no content extracted");
        }
        if self.is_mock() {
            return Ok(Analysis::mock());
        }

        let prompt = format!(
            "Analyze the following content and return JSON with:\n\
             - sentiment_score (0-10)\n\
             - sentiment_summary (short summary)\n\
             - key_discussions (3 discussion points)\n\
             - buying_intent (high/medium/low)\n\n\
             Title: {title}\nURL: {url}\nContent:\n{text}"
        );

        let content = self.chat(ANALYST_SYSTEM_PROMPT, &prompt).await?;
        let value = extract_json(&content)
            .with_context(|| format!("unparseable analysis response: {content}"))?;
        Ok(Analysis::from_value(&value))
    }

    /// Judge whether an analysis is usable for campaign planning.
    pub async fn review_quality(
        &self,
        analysis: &serde_json::Value,
        title: &str,
        url: &str,
        campaign: &Campaign,
    ) -> Result<QualityReview> {
        if self.is_mock() {
            return Ok(QualityReview::mock());
        }

        let prompt = format!(
            "Evaluate the analysis below and decide whether it can back ad copy \
             and campaign strategy. Return JSON with:\n\
             - quality_score (0-100)\n\
             - quality_pass (true/false)\n\
             - issues (list)\n\
             - notes (short explanation)\n\n\
             Brand: {}\nProduct: {}\nObjective: {}\n\
             Title: {title}\nURL: {url}\nAnalysis: {analysis}",
            campaign.brand, campaign.product, campaign.objective
        );

        let content = self.chat(REVIEWER_SYSTEM_PROMPT, &prompt).await?;
        let value = extract_json(&content)
            .with_context(|| format!("unparseable review response: {content}"))?;
        Ok(QualityReview::from_value(&value))
    }
}

/// Pull a JSON object out of a completion, tolerating prose around it.
pub fn extract_json(text: &str) -> Result<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }
    let start = text.find('{').ok_or_else(|| anyhow!("no JSON object in response"))?;
    let end = text.rfind('}').ok_or_else(|| anyhow!("no JSON object in response"))?;
    if end < start {
        bail!("no JSON object in response");
    }
    serde_json::from_str(&text[start..=end]).context("malformed JSON object in response")
}
