use std::time::Duration;

use anyhow::Result;
use chrono_tz::Tz;

use crate::model::RetryPolicy;

/// All recognized configuration options, assembled once at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache_duration: Duration,
    pub request_delay: Duration,
    pub retry: RetryPolicy,

    pub http_max_idle_connections: usize,
    pub http_max_idle_per_host: usize,
    pub http_idle_timeout: Duration,
    pub http_connect_timeout: Duration,
    pub http_request_timeout: Duration,

    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub llm_delay: Duration,

    pub upstream_host: String,
    pub display_timezone: String,
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            cache_duration: Duration::from_secs(parse_env("CACHE_DURATION_SECS", 24 * 3600)?),
            request_delay: Duration::from_millis(parse_env("REQUEST_DELAY_MS", 750)?),
            retry: RetryPolicy {
                max_attempts: parse_env("RETRY_MAX_ATTEMPTS", 4)?,
                initial_delay: Duration::from_millis(parse_env("RETRY_INITIAL_DELAY_MS", 500)?),
                max_delay: Duration::from_millis(parse_env("RETRY_MAX_DELAY_MS", 10_000)?),
                multiplier: parse_env("RETRY_BACKOFF_MULTIPLIER", 2.0)?,
            },

            http_max_idle_connections: parse_env("HTTP_MAX_IDLE_CONNECTIONS", 64)?,
            http_max_idle_per_host: parse_env("HTTP_MAX_IDLE_PER_HOST", 8)?,
            http_idle_timeout: Duration::from_secs(parse_env("HTTP_IDLE_TIMEOUT_SECS", 90)?),
            http_connect_timeout: Duration::from_secs(parse_env("HTTP_CONNECT_TIMEOUT_SECS", 10)?),
            http_request_timeout: Duration::from_secs(parse_env("HTTP_REQUEST_TIMEOUT_SECS", 30)?),

            llm_base_url: std::env::var("LLM_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or_default(),
            llm_model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            llm_timeout: Duration::from_secs(parse_env("LLM_TIMEOUT_SECS", 120)?),
            llm_delay: Duration::from_millis(parse_env("LLM_DELAY_MS", 1000)?),

            upstream_host: std::env::var("UPSTREAM_HOST").unwrap_or_else(|_| "kpopofficial.com".to_string()),
            display_timezone: std::env::var("DISPLAY_TIMEZONE").unwrap_or_else(|_| "Asia/Seoul".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_duration.is_zero() {
            anyhow::bail!("cache_duration must be positive");
        }
        if self.retry.multiplier <= 1.0 {
            anyhow::bail!("retry.backoff_multiplier must be greater than 1.0");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.display_timezone.parse::<Tz>().is_err() {
            anyhow::bail!("display_timezone \"{}\" is not a recognized IANA zone", self.display_timezone);
        }
        Ok(())
    }

    pub fn display_tz(&self) -> Tz {
        self.display_timezone.parse().expect("validated at load()")
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        _ => Ok(default),
    }
}
