pub mod http;
pub mod rate_limit;
pub mod retry;

pub use http::{monthly_schedule_url, HtmlFetcher, HttpClientConfig, MockHtmlFetcher, ReqwestHtmlFetcher};
pub use rate_limit::RateLimiter;
