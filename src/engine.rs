use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::classifier::{classify, BlockClass};
use crate::client::{HtmlFetcher, HttpClientConfig, ReqwestHtmlFetcher};
use crate::cleaner::clean_block;
use crate::collector::collect_artist_blocks;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::extract::{extract_deterministic, CompletionClient, LlmExtractor};
use crate::metrics::EngineMetricsSnapshot;
use crate::model::{CacheKey, Release, Whitelist};
use crate::reconciler::{group_and_select, reconcile_one};
use crate::scheduler::{twelve_month_window, Scheduler};

/// The query surface consumed by the chat-bot collaborator, owning the
/// Cache, the Scheduler handle, and the configured client trait objects.
pub struct Engine<C: CompletionClient> {
    config: EngineConfig,
    html_fetcher: Arc<dyn HtmlFetcher>,
    llm_extractor: Arc<LlmExtractor<C>>,
    cache: Arc<Cache>,
    scheduler: Scheduler,
}

/// A single "monthname-year" query unit, e.g. `("august", 2025)`.
#[derive(Debug, Clone)]
pub struct MonthYear {
    pub month: String,
    pub year: i32,
}

impl MonthYear {
    pub fn parse(spec: &str) -> Option<Self> {
        let (month, year) = spec.rsplit_once('-')?;
        Some(Self { month: month.to_lowercase(), year: year.parse().ok()? })
    }

    pub fn as_spec(&self) -> String {
        format!("{}-{}", self.month, self.year)
    }
}

impl<C: CompletionClient + 'static> Engine<C> {
    pub fn new(config: EngineConfig, llm_client: C) -> Result<Self, EngineError> {
        let http_config = HttpClientConfig {
            max_idle_connections: config.http_max_idle_connections,
            max_idle_per_host: config.http_max_idle_per_host,
            idle_timeout: config.http_idle_timeout,
            tls_handshake_timeout: config.http_connect_timeout,
            response_header_timeout: config.http_request_timeout,
            keep_alive: true,
            request_timeout: config.http_request_timeout,
            request_delay: config.request_delay,
            retry: config.retry,
        };
        let html_fetcher = Arc::new(ReqwestHtmlFetcher::new(http_config)?);
        Self::with_html_fetcher(config, llm_client, html_fetcher)
    }

    /// Builds an engine against an arbitrary `HtmlFetcher`, bypassing the
    /// real `reqwest`-backed one — used to exercise `releases_for` in tests
    /// against a stub fetcher, the way `CompletionClient` is already stubbed.
    pub fn with_html_fetcher(
        config: EngineConfig,
        llm_client: C,
        html_fetcher: Arc<dyn HtmlFetcher>,
    ) -> Result<Self, EngineError> {
        let llm_extractor = Arc::new(LlmExtractor::new(llm_client, config.llm_delay));
        let cache = Arc::new(Cache::new(config.cache_duration));

        Ok(Self {
            config,
            html_fetcher,
            llm_extractor,
            cache,
            scheduler: Scheduler::new(),
        })
    }

    /// Starts the scheduler's twelve-month warm-up loop on `refresh_interval`,
    /// using `whitelist` as the warm-up's artist set.
    pub fn start_scheduler(&mut self, refresh_interval: Duration, whitelist: Whitelist) {
        let html_fetcher = self.html_fetcher.clone();
        let llm_extractor = self.llm_extractor.clone();
        let cache = self.cache.clone();
        let display_tz = self.config.display_tz();
        let host = self.config.upstream_host.clone();
        let months = twelve_month_window();
        let cache_duration = self.config.cache_duration;

        self.scheduler.start(refresh_interval, cache_duration, move || {
            let html_fetcher = html_fetcher.clone();
            let llm_extractor = llm_extractor.clone();
            let cache = cache.clone();
            let host = host.clone();
            let whitelist = whitelist.clone();
            let months = months.clone();
            async move {
                for (month, year) in &months {
                    let releases = populate_month(
                        &html_fetcher,
                        &llm_extractor,
                        &host,
                        month,
                        *year,
                        &whitelist,
                        display_tz,
                        &CancellationToken::new(),
                    )
                    .await;
                    match releases {
                        Ok(releases) => {
                            let key = CacheKey::new(vec![format!("{month}-{year}")], &whitelist);
                            cache.write(key, releases, whitelist.clone());
                        }
                        Err(err) => warn!(%err, month, year, "warm-up failed for month"),
                    }
                }
            }
        });
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn metrics(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot::from_parts(
            self.cache.len(),
            self.cache.hit_ratio(),
            self.scheduler.last_full_update_unix_ms(),
            self.llm_extractor.metrics().snapshot(),
        )
    }

    /// `releasesFor(months, whitelist) -> (releases, stale)`. `months` are
    /// `"<english-month>-<year>"` specs, e.g. `"august-2025"`.
    pub async fn releases_for(
        &self,
        months: &[String],
        whitelist: &Whitelist,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Release>, bool), EngineError> {
        if whitelist.is_empty() {
            return Err(EngineError::EmptyWhitelist);
        }

        if let Some(filtered) = self.cache.read_filtered_subset(months, whitelist) {
            debug!("served from derived-filter fast path");
            return Ok((group_and_select(filtered), false));
        }

        let key = CacheKey::new(months.to_vec(), whitelist);
        let host = self.config.upstream_host.clone();
        let display_tz = self.config.display_tz();
        let html_fetcher = self.html_fetcher.clone();
        let llm_extractor = self.llm_extractor.clone();
        let month_specs: Vec<MonthYear> = months.iter().filter_map(|m| MonthYear::parse(m)).collect();
        let whitelist_clone = whitelist.clone();
        let cancel = cancel.clone();

        let result = self
            .cache
            .read_or_populate(key, whitelist.clone(), || async move {
                let mut all = Vec::new();
                for my in &month_specs {
                    let releases = populate_month(
                        &html_fetcher,
                        &llm_extractor,
                        &host,
                        &my.month,
                        my.year,
                        &whitelist_clone,
                        display_tz,
                        &cancel,
                    )
                    .await?;
                    all.extend(releases);
                }
                Ok(all)
            })
            .await?;

        Ok((group_and_select(result.releases), result.stale))
    }
}

/// Fetches one month's schedule page and runs it through the full
/// collect → clean → classify → extract → reconcile pipeline.
async fn populate_month<C: CompletionClient>(
    html_fetcher: &Arc<dyn HtmlFetcher>,
    llm_extractor: &Arc<LlmExtractor<C>>,
    host: &str,
    month: &str,
    year: i32,
    whitelist: &Whitelist,
    display_tz: chrono_tz::Tz,
    cancel: &CancellationToken,
) -> Result<Vec<Release>, EngineError> {
    let url = crate::client::monthly_schedule_url(host, month, year);
    let document = html_fetcher.fetch(&url, cancel).await?;
    let blocks = collect_artist_blocks(&document, whitelist);

    let mut releases = Vec::new();
    let mut complex_texts = Vec::new();

    for block in blocks {
        let Some(cleaned) = clean_block(&block.raw_html) else {
            continue;
        };

        match classify(&cleaned) {
            BlockClass::Simple => {
                if let Some(parsed) = extract_deterministic(&cleaned, month, year) {
                    if let Some(release) = reconcile_one(&parsed, month, year, &cleaned.structured_text, display_tz)? {
                        releases.push(release);
                    }
                }
            }
            BlockClass::Complex => {
                complex_texts.push(cleaned.structured_text);
            }
        }
    }

    if !complex_texts.is_empty() {
        let llm_results = llm_extractor.extract_batch(&complex_texts, month).await?;
        let joined_raw = complex_texts.join("; ");
        for parsed in &llm_results {
            if let Some(release) = reconcile_one(parsed, month, year, &joined_raw, display_tz)? {
                releases.push(release);
            }
        }
    }

    info!(month, year, count = releases.len(), "populated month");
    Ok(releases)
}
