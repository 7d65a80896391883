//! Bounded retry with backoff, shared by navigation, probing and fingerprinting

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Growth of the wait between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// base, 2*base, 3*base, ...
    Linear,
    /// base, 2*base, 4*base, ...
    Exponential,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Page navigation: transient failures are common and cheap to retry
    pub fn navigation() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff: Backoff::Exponential,
        }
    }

    /// Probe requests: one extra attempt on dropped connections
    pub fn probe() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(250),
            backoff: Backoff::Linear,
        }
    }

    /// Wait before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(retry),
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1))),
        }
    }
}

/// Runs `op` until it succeeds, `classify` rejects the error, or attempts run out.
/// The last error is returned.
pub async fn retry_with_backoff<T, E, F, Fut, C>(policy: &RetryPolicy, mut op: F, classify: C) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && classify(&e) => {
                let wait = policy.delay_for(attempt);
                debug!("Attempt {attempt}/{attempts} failed ({e}), retrying in {wait:?}");
                sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
