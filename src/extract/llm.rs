use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::rate_limit::RateLimiter;
use crate::error::EngineError;
use crate::model::ParsedRelease;

static JSON_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap());

const SYSTEM_PROMPT: &str = "You are a strict JSON-array extractor for K-pop comeback schedules. \
Reply with a bare JSON array only, no prose, no markdown fences. Each element has exactly the \
fields: artist, date, track, album, youtube (all strings, ASCII only; empty string for unknown).";

/// Abstracts the remote text-completion endpoint so the extractor can be
/// tested with a mock in place of a real HTTP round trip.
#[mockall::automock]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, EngineError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Talks to an OpenAI-chat-completions-compatible endpoint via `reqwest`.
pub struct ReqwestCompletionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl ReqwestCompletionClient {
    pub fn new(http: reqwest::Client, base_url: String, api_key: String, model: String, timeout: Duration) -> Self {
        Self { http, base_url, api_key, model, timeout }
    }
}

#[async_trait]
impl CompletionClient for ReqwestCompletionClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, EngineError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            temperature: 0.2,
            top_p: 0.7,
            max_tokens: 4096,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| EngineError::Network { attempts: 1, source })?;

        if !response.status().is_success() {
            return Err(EngineError::Status { status: response.status().as_u16(), url });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|source| EngineError::Network { attempts: 1, source })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngineError::Extraction("LLM response carried no choices".to_string()))
    }
}

/// Atomic request/success/failure counters plus a last-request timestamp.
#[derive(Debug)]
pub struct LlmMetrics {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    last_request_unix_ms: AtomicI64,
    delay: Duration,
}

impl LlmMetrics {
    pub fn new(delay: Duration) -> Self {
        Self {
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            last_request_unix_ms: AtomicI64::new(0),
            delay,
        }
    }

    fn record_attempt(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        self.last_request_unix_ms.store(now_ms, Ordering::Relaxed);
    }

    fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LlmMetricsSnapshot {
        LlmMetricsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            failure: self.failure.load(Ordering::Relaxed),
            last_request_unix_ms: self.last_request_unix_ms.load(Ordering::Relaxed),
            delay: self.delay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LlmMetricsSnapshot {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub last_request_unix_ms: i64,
    pub delay: Duration,
}

#[derive(Debug, Deserialize)]
struct RawLlmRelease {
    artist: String,
    date: String,
    track: String,
    album: String,
    youtube: String,
}

impl From<RawLlmRelease> for ParsedRelease {
    fn from(raw: RawLlmRelease) -> Self {
        ParsedRelease {
            artist: raw.artist,
            date_text: raw.date,
            track: raw.track,
            album: raw.album,
            youtube_url: raw.youtube,
        }
    }
}

/// Batches complex cleaned blocks into one prompt, rate-limits and records
/// metrics per call, and parses the reply's JSON array into [`ParsedRelease`]s.
pub struct LlmExtractor<C: CompletionClient> {
    client: C,
    limiter: RateLimiter,
    metrics: Arc<LlmMetrics>,
}

impl<C: CompletionClient> LlmExtractor<C> {
    pub fn new(client: C, delay: Duration) -> Self {
        Self {
            client,
            limiter: RateLimiter::new(delay),
            metrics: Arc::new(LlmMetrics::new(delay)),
        }
    }

    pub fn metrics(&self) -> Arc<LlmMetrics> {
        self.metrics.clone()
    }

    /// Submits all `cleaned_need_unparse` blocks joined with `"; "` in one
    /// request and parses the reply into zero or more [`ParsedRelease`]s.
    pub async fn extract_batch(&self, blocks: &[String], target_month: &str) -> Result<Vec<ParsedRelease>, EngineError> {
        if blocks.is_empty() {
            return Ok(Vec::new());
        }

        let user_prompt = build_user_prompt(blocks, target_month);

        self.limiter.acquire().await;
        self.metrics.record_attempt();

        let result = self.client.complete(SYSTEM_PROMPT, &user_prompt).await;
        match &result {
            Ok(_) => self.metrics.record_success(),
            Err(err) => {
                warn!(%err, "LLM completion failed");
                self.metrics.record_failure();
            }
        }
        let raw_reply = result?;

        let releases = parse_response(&raw_reply)?;
        debug!(count = releases.len(), "LLM batch parsed");
        Ok(releases.into_iter().map(ParsedRelease::from).collect())
    }
}

fn build_user_prompt(blocks: &[String], target_month: &str) -> String {
    let rules = format!(
        "Rules: only emit releases dated in {target_month}; preserve YouTube URLs verbatim; \
when a block lists multiple dates, emit only the releases matching {target_month} and never copy \
a link from one release to another; when a block has no date inside need_unparse, assign its \
<date> tag's value to every release emitted from it; split multi-track lists under \"Title Track:\" \
into separate releases sharing the same album; strip surrounding quotes and MV/Release markers \
from track titles, but keep version suffixes and \"feat.\" segments; for album-only releases with \
no explicit track, use the YouTube link's anchor text as the track placeholder."
    );
    let joined = blocks.join("; ");
    format!("{rules}\n\n{joined}")
}

/// Locates the outermost `[ … ]` in the reply (after stripping an optional
/// ```json fence) and decodes it as an array of records. The first
/// non-whitespace character of the unfenced reply must itself be `[` — a
/// top-level object wrapper such as `{"releases": [...]}` is rejected rather
/// than unwrapped, to keep the contract strict.
fn parse_response(raw: &str) -> Result<Vec<RawLlmRelease>, EngineError> {
    let unfenced = match JSON_FENCE.captures(raw) {
        Some(caps) => caps[1].to_string(),
        None => raw.to_string(),
    };
    let trimmed = unfenced.trim();

    if !trimmed.starts_with('[') {
        return Err(EngineError::Extraction("LLM reply is not a bare JSON array".to_string()));
    }

    let end = trimmed
        .rfind(']')
        .ok_or_else(|| EngineError::Extraction("unterminated JSON array in LLM reply".to_string()))?;

    let array_text = &trimmed[..=end];
    serde_json::from_str(array_text).map_err(|e| EngineError::Extraction(format!("invalid JSON array: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubClient {
        reply: String,
    }

    #[async_trait]
    impl CompletionClient for StubClient {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, EngineError> {
            Ok(self.reply.clone())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl CompletionClient for FailingClient {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, EngineError> {
            Err(EngineError::Status { status: 503, url: "x".into() })
        }
    }

    struct RecordingClient {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionClient for RecordingClient {
        async fn complete(&self, _system: &str, user: &str) -> Result<String, EngineError> {
            self.calls.lock().unwrap().push(user.to_string());
            Ok("[]".to_string())
        }
    }

    #[test]
    fn parses_bare_array() {
        let raw = r#"[{"artist":"IVE","date":"01.08.25","track":"Song","album":"","youtube":"https://youtu.be/x"}]"#;
        let releases = parse_response(raw).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].artist, "IVE");
    }

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n[{\"artist\":\"IVE\",\"date\":\"01.08.25\",\"track\":\"\",\"album\":\"\",\"youtube\":\"\"}]\n```";
        let releases = parse_response(raw).unwrap();
        assert_eq!(releases.len(), 1);
    }

    #[test]
    fn rejects_object_wrapper() {
        let raw = r#"{"releases": [{"artist":"IVE","date":"01.08.25","track":"","album":"","youtube":""}]}"#;
        assert!(parse_response(raw).is_err());
    }

    #[test]
    fn rejects_non_array_reply() {
        let raw = r#"{"artist":"IVE"}"#;
        assert!(parse_response(raw).is_err());
    }

    #[tokio::test]
    async fn extract_batch_returns_empty_for_no_blocks() {
        let extractor = LlmExtractor::new(StubClient { reply: "[]".to_string() }, Duration::from_millis(0));
        let result = extractor.extract_batch(&[], "august").await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn extract_batch_parses_releases_and_records_success() {
        let reply = r#"[{"artist":"IVE","date":"01.08.25","track":"Song","album":"","youtube":""}]"#.to_string();
        let extractor = LlmExtractor::new(StubClient { reply }, Duration::from_millis(0));
        let releases = extractor.extract_batch(&["block text".to_string()], "august").await.unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].artist, "IVE");
        let snapshot = extractor.metrics().snapshot();
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.success, 1);
        assert_eq!(snapshot.failure, 0);
    }

    #[tokio::test]
    async fn extract_batch_records_failure_on_client_error() {
        let extractor = LlmExtractor::new(FailingClient, Duration::from_millis(0));
        let result = extractor.extract_batch(&["block".to_string()], "august").await;
        assert!(result.is_err());
        let snapshot = extractor.metrics().snapshot();
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.failure, 1);
    }

    #[tokio::test]
    async fn blocks_are_joined_with_semicolon_in_prompt() {
        let client = RecordingClient { calls: Mutex::new(Vec::new()) };
        let extractor = LlmExtractor::new(client, Duration::from_millis(0));
        extractor
            .extract_batch(&["first".to_string(), "second".to_string()], "august")
            .await
            .unwrap();
        let calls = extractor.client.calls.lock().unwrap();
        assert!(calls[0].contains("first; second"));
    }
}
