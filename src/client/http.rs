use std::time::Duration;

use async_trait::async_trait;
use scraper::Html;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::model::RetryPolicy;

use super::rate_limit::RateLimiter;
use super::retry::with_retry;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Transport configuration for the HTML client's keep-alive pool.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub max_idle_connections: usize,
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    pub response_header_timeout: Duration,
    pub keep_alive: bool,
    pub request_timeout: Duration,
    pub request_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_idle_connections: 64,
            max_idle_per_host: 8,
            idle_timeout: Duration::from_secs(90),
            tls_handshake_timeout: Duration::from_secs(10),
            response_header_timeout: Duration::from_secs(30),
            keep_alive: true,
            request_timeout: Duration::from_secs(30),
            request_delay: Duration::from_millis(750),
            retry: RetryPolicy::default(),
        }
    }
}

/// Fetches and parses a monthly schedule page. Abstracted behind a trait so
/// the row collector and the engine can be exercised against a mock in tests.
#[mockall::automock]
#[async_trait]
pub trait HtmlFetcher: Send + Sync {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Html, EngineError>;
}

pub struct ReqwestHtmlFetcher {
    client: reqwest::Client,
    config: HttpClientConfig,
    limiter: RateLimiter,
}

impl ReqwestHtmlFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, EngineError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .connect_timeout(config.tls_handshake_timeout)
            .timeout(config.request_timeout);
        if !config.keep_alive {
            builder = builder.pool_max_idle_per_host(0);
        }
        let client = builder
            .build()
            .map_err(|e| EngineError::Parse(format!("failed to build HTTP client: {e}")))?;
        let limiter = RateLimiter::new(config.request_delay);
        Ok(Self { client, config, limiter })
    }

    async fn fetch_once(&self, url: &str) -> Result<Html, EngineError> {
        self.limiter.acquire().await;
        debug!(url, "fetching monthly schedule page");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::Network { attempts: 1, source: e })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| EngineError::Network { attempts: 1, source: e })?;

        if body.trim().is_empty() {
            return Err(EngineError::Parse("empty response body".to_string()));
        }

        Ok(Html::parse_document(&body))
    }
}

#[async_trait]
impl HtmlFetcher for ReqwestHtmlFetcher {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Html, EngineError> {
        let url = url.to_string();
        let result = with_retry(self.config.retry, cancel, || {
            let url = url.clone();
            async move { self.fetch_once(&url).await }
        })
        .await;

        if result.is_err() {
            warn!(url, "all retry attempts exhausted");
        }
        result
    }
}

/// Builds the upstream URL for a given lowercase English month name and year.
pub fn monthly_schedule_url(host: &str, month: &str, year: i32) -> String {
    format!("https://{host}/kpop-comeback-schedule-{month}-{year}/")
}
