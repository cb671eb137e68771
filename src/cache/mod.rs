pub mod single_flight;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::model::{CacheEntry, CacheKey, Release, Whitelist};

use single_flight::SingleFlight;

/// Keyed map from [`CacheKey`] to [`CacheEntry`], one map for every
/// `(months, whitelist fingerprint)` tuple rather than a map per content kind.
#[derive(Debug)]
pub struct Cache {
    entries: DashMap<CacheKey, CacheEntry>,
    single_flight: SingleFlight<CacheKey, Vec<Release>>,
    cache_duration: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Outcome of [`Cache::read_or_populate`]: whether the releases came back
/// fresh, or are being served stale after a failed population attempt.
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub releases: Vec<Release>,
    pub stale: bool,
}

impl Cache {
    pub fn new(cache_duration: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            single_flight: SingleFlight::new(),
            cache_duration,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn read(&self, key: &CacheKey) -> Option<Vec<Release>> {
        let entry = self.entries.get(key)?;
        if entry.is_fresh(self.cache_duration) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.releases.clone())
        } else {
            None
        }
    }

    pub fn read_stale(&self, key: &CacheKey) -> Option<Vec<Release>> {
        self.entries.get(key).map(|e| e.releases.clone())
    }

    pub fn write(&self, key: CacheKey, releases: Vec<Release>, whitelist: Whitelist) {
        self.entries.insert(key, CacheEntry::new(releases, whitelist));
    }

    pub fn clear(&self) {
        self.entries.clear();
        info!("cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }

    /// Fast path: if `whitelist` is a subset of the most recently cached full
    /// whitelist for the same month set, filter that cached value instead of
    /// re-fetching. Returns `None` when no such superset entry exists.
    pub fn read_filtered_subset(&self, months: &[String], whitelist: &Whitelist) -> Option<Vec<Release>> {
        let mut sorted_months = months.to_vec();
        sorted_months.sort();
        sorted_months.dedup();

        self.entries
            .iter()
            .filter(|entry| entry.key().months == sorted_months && entry.is_fresh(self.cache_duration))
            .find_map(|entry| {
                if whitelist.is_subset_of(&entry.whitelist) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some(filter_by_whitelist(&entry.releases, whitelist))
                } else {
                    None
                }
            })
    }

    /// Reads a fresh value if present; otherwise populates via `populate`,
    /// coalescing concurrent misses for the same key into a single call.
    /// On population failure, falls back to a stale entry if one exists; with
    /// no stale entry to fall back to, reports [`EngineError::UpstreamUnavailable`]
    /// rather than the raw fetch error, since by this point every retry the
    /// fetch layer was willing to make has already been exhausted.
    pub async fn read_or_populate<F, Fut>(
        &self,
        key: CacheKey,
        whitelist: Whitelist,
        populate: F,
    ) -> Result<ReadResult, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<Release>, EngineError>>,
    {
        if let Some(releases) = self.read(&key) {
            debug!(?key, "cache hit");
            return Ok(ReadResult { releases, stale: false });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(?key, "cache miss, populating");

        let key_for_write = key.clone();
        let result = self.single_flight.run(key.clone(), populate).await;

        match result {
            Ok(releases) => {
                self.write(key_for_write, releases.clone(), whitelist);
                Ok(ReadResult { releases, stale: false })
            }
            Err(err) => match self.read_stale(&key) {
                Some(releases) => {
                    warn!(?key, "population failed, serving stale entry");
                    Ok(ReadResult { releases, stale: true })
                }
                None => {
                    warn!(?key, %err, "population failed with no stale entry to fall back to");
                    Err(EngineError::UpstreamUnavailable)
                }
            },
        }
    }
}

fn filter_by_whitelist(releases: &[Release], whitelist: &Whitelist) -> Vec<Release> {
    releases.iter().filter(|r| whitelist.contains(&r.artist)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn release(artist: &str, date: &str) -> Release {
        Release {
            date: date.to_string(),
            time_local: String::new(),
            artist: artist.to_string(),
            album: String::new(),
            title_track: String::new(),
            mv_url: String::new(),
        }
    }

    fn key(months: &[&str], whitelist: &Whitelist) -> CacheKey {
        CacheKey::new(months.iter().map(|m| m.to_string()).collect(), whitelist)
    }

    fn upstream_down_error() -> EngineError {
        EngineError::Status { status: 503, url: "https://kpopofficial.com/test".to_string() }
    }

    #[tokio::test]
    async fn populates_on_miss_and_hits_thereafter() {
        let cache = Cache::new(Duration::from_secs(3600));
        let whitelist = Whitelist::from_names(["cortis"]);
        let k = key(&["august"], &whitelist);

        let result = cache
            .read_or_populate(k.clone(), whitelist, || async {
                Ok::<_, EngineError>(vec![release("CORTIS", "11.08.25")])
            })
            .await
            .unwrap();
        assert!(!result.stale);
        assert_eq!(result.releases.len(), 1);
        assert!(cache.read(&k).is_some());
    }

    #[tokio::test]
    async fn falls_back_to_stale_entry_on_population_failure() {
        let cache = Cache::new(Duration::from_millis(0));
        let whitelist = Whitelist::from_names(["cortis"]);
        let k = key(&["august"], &whitelist);

        cache.write(k.clone(), vec![release("CORTIS", "11.08.25")], whitelist.clone());

        let result = cache
            .read_or_populate(k, whitelist, || async { Err(upstream_down_error()) })
            .await
            .unwrap();
        assert!(result.stale);
        assert_eq!(result.releases.len(), 1);
    }

    #[tokio::test]
    async fn propagates_upstream_unavailable_with_no_stale_fallback() {
        let cache = Cache::new(Duration::from_secs(3600));
        let whitelist = Whitelist::from_names(["cortis"]);
        let k = key(&["august"], &whitelist);

        let result = cache
            .read_or_populate(k, whitelist, || async { Err(upstream_down_error()) })
            .await;
        assert!(matches!(result, Err(EngineError::UpstreamUnavailable)));
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_into_one_population() {
        let cache = Arc::new(Cache::new(Duration::from_secs(3600)));
        let whitelist = Whitelist::from_names(["cortis"]);
        let k = key(&["august"], &whitelist);
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let k = k.clone();
            let whitelist = whitelist.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .read_or_populate(k, whitelist, move || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, EngineError>(vec![release("CORTIS", "11.08.25")])
                        }
                    })
                    .await
                    .unwrap()
            }));
        }

        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn filtered_subset_reads_without_network() {
        let cache = Cache::new(Duration::from_secs(3600));
        let full = Whitelist::from_names(["cortis", "aespa"]);
        let k = key(&["august"], &full);
        cache.write(k, vec![release("CORTIS", "11.08.25"), release("AESPA", "12.08.25")], full);

        let narrow = Whitelist::from_names(["cortis"]);
        let filtered = cache.read_filtered_subset(&["august".to_string()], &narrow).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].artist, "CORTIS");
    }
}
