use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{Datelike, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::model::Whitelist;

/// Drives the engine's twelve-month cache warm-up at start and a periodic
/// re-warm once per `refresh_interval`, tracking only the last completion
/// timestamp beyond that — the core never mutates this state itself.
pub struct Scheduler {
    last_full_update_unix_ms: Arc<AtomicI64>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            last_full_update_unix_ms: Arc::new(AtomicI64::new(0)),
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn last_full_update_unix_ms(&self) -> i64 {
        self.last_full_update_unix_ms.load(Ordering::Relaxed)
    }

    /// Spawns a coarse tick every `refresh_interval`; the twelve-month
    /// `warm_up` routine itself only runs once `cache_duration` has elapsed
    /// since the last full update, so a short `refresh_interval` is a cheap
    /// staleness probe rather than a re-fetch-everything cadence.
    pub fn start<F, Fut>(&mut self, refresh_interval: Duration, cache_duration: Duration, warm_up: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let cancel = self.cancel.clone();
        let last_full_update = self.last_full_update_unix_ms.clone();
        let cache_duration_ms = cache_duration.as_millis() as i64;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(refresh_interval);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("scheduler shutting down");
                        return;
                    }
                    _ = interval.tick() => {
                        let elapsed = now_unix_ms() - last_full_update.load(Ordering::Relaxed);
                        if elapsed < cache_duration_ms {
                            debug!(elapsed, "cache still fresh, skipping warm-up");
                            continue;
                        }
                        info!("starting twelve-month cache warm-up");
                        warm_up().await;
                        last_full_update.store(now_unix_ms(), Ordering::Relaxed);
                        info!("cache warm-up finished");
                    }
                }
            }
        });

        self.handle = Some(handle);
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The twelve lowercase English month names paired with the calendar year
/// they belong to, centered on the current month, for the warm-up routine.
pub fn twelve_month_window() -> Vec<(String, i32)> {
    let today = Utc::now();
    let mut months = Vec::with_capacity(12);
    let mut year = today.year();
    let mut month = today.month();

    for _ in 0..12 {
        months.push((month_name(month).to_string(), year));
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    months
}

fn month_name(month: u32) -> &'static str {
    const NAMES: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september", "october", "november",
        "december",
    ];
    NAMES[(month - 1) as usize]
}

/// Kept distinct from [`twelve_month_window`] so callers that only need the
/// whitelist fingerprint don't pull in the month/year generation.
pub fn default_whitelist_fingerprint(whitelist: &Whitelist) -> String {
    whitelist.fingerprint()
}
