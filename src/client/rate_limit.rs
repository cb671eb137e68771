use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// A monitor-style rate limiter: a single lock around the timestamp of the
/// last permitted call. `acquire` sleeps just long enough that two calls are
/// never closer together than `delay`.
pub struct RateLimiter {
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_request: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut guard = self.last_request.lock().await;
        if let Some(last) = *guard {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}
