pub mod cache;
pub mod classifier;
pub mod cleaner;
pub mod client;
pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod model;
pub mod reconciler;
pub mod scheduler;
pub mod youtube_url;

pub use config::EngineConfig;
pub use engine::{Engine, MonthYear};
pub use error::{EngineError, EngineResult};
pub use metrics::EngineMetricsSnapshot;
pub use model::{CacheKey, Release, Whitelist};
