//! Bounded retry envelope shared by every scraper operation.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::ScrapeError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Multiplier applied to `delay` after each failed attempt (1.0 = fixed).
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
            backoff: 1.5,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: 1.0,
        }
    }

    /// Wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as i32;
        self.delay.mul_f64(self.backoff.max(1.0).powi(exp))
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. `reset` runs after every retryable failure
/// (including the last one) so the next caller starts on a fresh session.
pub async fn with_retry<T, Op, OpFut, Reset, ResetFut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: Op,
    mut reset: Reset,
) -> Result<T, ScrapeError>
where
    Op: FnMut(u32) -> OpFut,
    OpFut: Future<Output = Result<T, ScrapeError>>,
    Reset: FnMut() -> ResetFut,
    ResetFut: Future<Output = ()>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} recovered on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        reset().await;

        if attempt >= max_attempts {
            warn!(attempts = attempt, "{} gave up: {}", label, err);
            return Err(err);
        }

        let wait = policy.delay_for(attempt);
        warn!(
            attempt,
            wait_ms = wait.as_millis() as u64,
            "{} failed, retrying on a fresh session: {}",
            label,
            err
        );
        sleep(wait).await;
        attempt += 1;
    }
}
