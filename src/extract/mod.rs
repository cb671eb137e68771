pub mod deterministic;
pub mod llm;

pub use deterministic::extract_deterministic;
pub use llm::{CompletionClient, LlmExtractor, LlmMetrics, LlmMetricsSnapshot, MockCompletionClient, ReqwestCompletionClient};
