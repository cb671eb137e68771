use thiserror::Error;

/// The seven error kinds the engine can surface to a caller.
///
/// Single-record failures (`DateError`) never escape the page they occurred
/// on; everything else propagates up through [`crate::engine::Engine`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("network error after {attempts} attempt(s): {source}")]
    Network {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("failed to parse HTML document: {0}")]
    Parse(String),

    #[error("LLM extraction failed: {0}")]
    Extraction(String),

    #[error("could not parse date \"{0}\"")]
    Date(String),

    #[error("whitelist must not be empty")]
    EmptyWhitelist,

    #[error("upstream unavailable and no cached data for this key")]
    UpstreamUnavailable,

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether the HTML client's retry wrapper should attempt this error again.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Network { .. } => true,
            EngineError::Status { status, .. } => (500..600).contains(status),
            EngineError::Parse(_)
            | EngineError::Extraction(_)
            | EngineError::Date(_)
            | EngineError::EmptyWhitelist
            | EngineError::UpstreamUnavailable
            | EngineError::Cancelled => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
