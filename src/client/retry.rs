use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::model::RetryPolicy;

/// Re-invokes `op` until it succeeds, the policy is exhausted, or `cancel` fires.
///
/// Delay between attempt `k` and `k+1` is `min(initial_delay * multiplier^k,
/// max_delay)`. A cancellation observed while sleeping returns
/// [`EngineError::Cancelled`] immediately instead of waiting out the backoff.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0u32;
    let mut delay = policy.initial_delay;

    loop {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        attempt += 1;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            result = op() => result,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                warn!(attempt, %err, "retryable error, backing off");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = next_delay(delay, policy.multiplier, policy.max_delay);
            }
            Err(err) if err.is_retryable() => {
                debug!(attempt, "retries exhausted");
                return Err(err);
            }
            Err(err) => return Err(err),
        }
    }
}

fn next_delay(current: Duration, multiplier: f64, max_delay: Duration) -> Duration {
    let scaled = current.mul_f64(multiplier);
    scaled.min(max_delay)
}
