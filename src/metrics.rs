use crate::extract::LlmMetricsSnapshot;

/// Point-in-time counters exposed through the Query API's `metrics()` call.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineMetricsSnapshot {
    pub cache_size: usize,
    pub llm_requests_total: u64,
    pub llm_successes: u64,
    pub llm_failures: u64,
    pub last_full_update_unix_ms: i64,
    pub cache_hit_ratio: f64,
}

impl EngineMetricsSnapshot {
    pub fn from_parts(cache_size: usize, cache_hit_ratio: f64, last_full_update_unix_ms: i64, llm: LlmMetricsSnapshot) -> Self {
        Self {
            cache_size,
            llm_requests_total: llm.total,
            llm_successes: llm.success,
            llm_failures: llm.failure,
            last_full_update_unix_ms,
            cache_hit_ratio,
        }
    }
}
