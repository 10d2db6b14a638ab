//! Bounded waiting and retrying.
//!
//! Coordination queries are single-shot and lifecycle checks never retry on
//! their own. Callers that need resilience wrap them in [`retry_with_backoff`]
//! or poll a condition with [`wait_until`].

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};

use crate::{HarnessError, debug, warn};

/// Attempt budget and exponential backoff for [`retry_with_backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay after the given 1-based failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Poll `condition` every `backoff` until it holds, failing once `timeout` has elapsed.
pub async fn wait_until<F, Fut>(
    mut condition: F,
    timeout: Duration,
    backoff: Duration,
    what: &str,
) -> Result<(), HarnessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = Instant::now();
    let deadline = started + timeout;
    loop {
        if condition().await {
            debug!("{what} after {:?}", started.elapsed());
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(HarnessError::TerminationTimeout {
                what: what.to_string(),
                timeout,
            });
        }
        sleep(backoff.min(deadline - now)).await;
    }
}

/// Run `operation` until it succeeds or the policy's attempts are exhausted.
/// The last error is returned when every attempt fails.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut operation: F,
) -> Result<T, HarnessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HarnessError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                let delay = policy.backoff_for(attempt);
                warn!(
                    "{what} failed (attempt {attempt}/{}): {e}; retrying in {delay:?}",
                    policy.max_attempts
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
