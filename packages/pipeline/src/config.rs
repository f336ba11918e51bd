//! Application configuration loaded from environment variables.
//!
//! Every recognized option is enumerated here with its type and default,
//! parsed and validated once at startup. Malformed values are fatal
//! (`ConfigError::Invalid`) rather than silently defaulted.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

use crate::error::ConfigError;
use site_crawler::{FetchConfig, RobotsConfig, ThrottleConfig};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Which chat-completions dialect the LLM endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmApiMode {
    OpenAi,
    Ollama,
}

impl FromStr for LlmApiMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmApiMode::OpenAi),
            "ollama" => Ok(LlmApiMode::Ollama),
            other => Err(ConfigError::Invalid(format!(
                "LLM_API_MODE must be 'openai' or 'ollama', got '{other}'"
            ))),
        }
    }
}

/// LLM endpoint settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// "ollama", "openai", or "mock" (no network).
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub api_key_header: String,
    pub api_mode: LlmApiMode,
    pub timeout: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            api_key: None,
            api_key_header: "Authorization".to_string(),
            api_mode: LlmApiMode::OpenAi,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Validated application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,

    // Crawl behavior
    pub max_concurrent: usize,
    pub retries: u32,
    pub retry_backoff_base: Duration,
    pub retry_backoff_max: Duration,
    pub user_agent: String,
    pub page_timeout: Duration,
    pub local_raw_dir: PathBuf,
    pub local_store_only: bool,
    pub max_text_chars: usize,

    // Domain policy
    pub allow_domains: Vec<String>,
    pub deny_domains: Vec<String>,
    pub robots_enabled: bool,
    pub robots_user_agent: String,
    pub robots_cache_ttl: Duration,
    pub robots_fail_open: bool,
    pub domain_delay_base: Duration,
    pub domain_delay_max: Duration,

    // Queue policy
    pub lease_seconds: i64,
    pub requeue_error_after_hours: i64,
    pub requeue_max_attempts: i32,

    pub llm: LlmSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_concurrent: 3,
            retries: 3,
            retry_backoff_base: Duration::from_secs_f64(1.5),
            retry_backoff_max: Duration::from_secs_f64(30.0),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            page_timeout: Duration::from_millis(30_000),
            local_raw_dir: PathBuf::from("raw_html"),
            local_store_only: false,
            max_text_chars: 12_000,
            allow_domains: Vec::new(),
            deny_domains: Vec::new(),
            robots_enabled: true,
            robots_user_agent: "MarketSenseBot".to_string(),
            robots_cache_ttl: Duration::from_secs(3600),
            robots_fail_open: true,
            domain_delay_base: Duration::from_secs_f64(1.0),
            domain_delay_max: Duration::from_secs_f64(15.0),
            lease_seconds: 600,
            requeue_error_after_hours: 24,
            requeue_max_attempts: 5,
            llm: LlmSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from the process environment (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv();

        let defaults = Settings::default();
        let llm_defaults = LlmSettings::default();

        let settings = Settings {
            database_url: lookup("DATABASE_URL").ok_or_else(|| {
                ConfigError::Invalid("DATABASE_URL must be set".to_string())
            })?,
            max_concurrent: parse_num("MAX_CONCURRENT", defaults.max_concurrent)?,
            retries: parse_num("RETRIES", defaults.retries)?,
            retry_backoff_base: parse_secs("RETRY_BACKOFF_BASE", defaults.retry_backoff_base)?,
            retry_backoff_max: parse_secs("RETRY_BACKOFF_MAX", defaults.retry_backoff_max)?,
            user_agent: lookup("USER_AGENT").unwrap_or(defaults.user_agent),
            page_timeout: Duration::from_millis(parse_num("PAGE_TIMEOUT_MS", 30_000u64)?),
            local_raw_dir: lookup("LOCAL_RAW_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_raw_dir),
            local_store_only: parse_bool("LOCAL_STORE_ONLY", defaults.local_store_only)?,
            max_text_chars: parse_num("MAX_TEXT_CHARS", defaults.max_text_chars)?,
            allow_domains: parse_list(lookup("ALLOW_DOMAINS")),
            deny_domains: parse_list(lookup("DENY_DOMAINS")),
            robots_enabled: parse_bool("ROBOTS_ENABLED", defaults.robots_enabled)?,
            robots_user_agent: lookup("ROBOTS_USER_AGENT").unwrap_or(defaults.robots_user_agent),
            robots_cache_ttl: Duration::from_secs(parse_num("ROBOTS_CACHE_TTL", 3600u64)?),
            robots_fail_open: parse_bool("ROBOTS_FAIL_OPEN", defaults.robots_fail_open)?,
            domain_delay_base: parse_secs("DOMAIN_DELAY_BASE", defaults.domain_delay_base)?,
            domain_delay_max: parse_secs("DOMAIN_DELAY_MAX", defaults.domain_delay_max)?,
            lease_seconds: parse_num("LEASE_SECONDS", defaults.lease_seconds)?,
            requeue_error_after_hours: parse_num(
                "REQUEUE_ERROR_AFTER_HOURS",
                defaults.requeue_error_after_hours,
            )?,
            requeue_max_attempts: parse_num(
                "REQUEUE_MAX_ATTEMPTS",
                defaults.requeue_max_attempts,
            )?,
            llm: LlmSettings {
                provider: lookup("LLM_PROVIDER").unwrap_or(llm_defaults.provider),
                base_url: lookup("LLM_BASE_URL").unwrap_or(llm_defaults.base_url),
                model: lookup("LLM_MODEL").unwrap_or(llm_defaults.model),
                api_key: lookup("LLM_API_KEY"),
                api_key_header: lookup("LLM_API_KEY_HEADER").unwrap_or(llm_defaults.api_key_header),
                api_mode: match lookup("LLM_API_MODE") {
                    Some(mode) => mode.parse()?,
                    None => llm_defaults.api_mode,
                },
                timeout: Duration::from_secs(parse_num("LLM_TIMEOUT", 60u64)?),
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Cross-field checks that cannot be expressed per key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "MAX_CONCURRENT must be at least 1".to_string(),
            ));
        }
        if self.retries == 0 {
            return Err(ConfigError::Invalid("RETRIES must be at least 1".to_string()));
        }
        if self.lease_seconds <= 0 {
            return Err(ConfigError::Invalid(
                "LEASE_SECONDS must be positive".to_string(),
            ));
        }
        if self.domain_delay_max < self.domain_delay_base {
            return Err(ConfigError::Invalid(
                "DOMAIN_DELAY_MAX must be >= DOMAIN_DELAY_BASE".to_string(),
            ));
        }
        for (key, list) in [
            ("ALLOW_DOMAINS", &self.allow_domains),
            ("DENY_DOMAINS", &self.deny_domains),
        ] {
            for entry in list {
                if entry.contains('/') || entry.contains("://") || entry.contains(' ') {
                    return Err(ConfigError::Invalid(format!(
                        "{key} entries must be bare hostnames, got '{entry}'"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            delay_base: self.domain_delay_base,
            delay_max: self.domain_delay_max,
        }
    }

    pub fn robots_config(&self) -> RobotsConfig {
        RobotsConfig {
            enabled: self.robots_enabled,
            user_agent: self.robots_user_agent.clone(),
            cache_ttl: self.robots_cache_ttl,
            fail_open: self.robots_fail_open,
        }
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            user_agent: self.user_agent.clone(),
            timeout: self.page_timeout,
        }
    }
}

fn lookup(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_num<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => parse_num_value(key, &value),
    }
}

fn parse_num_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{key}: {e}")))
}

fn parse_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => parse_secs_value(key, &value),
    }
}

fn parse_secs_value(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_num_value(key, value)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(ConfigError::Invalid(format!(
            "{key} must be a non-negative number of seconds"
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => parse_bool_value(key, &value),
    }
}

fn parse_bool_value(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(true),
        "0" | "false" | "no" | "n" => Ok(false),
        other => Err(ConfigError::Invalid(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|item| item.trim().to_lowercase())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
