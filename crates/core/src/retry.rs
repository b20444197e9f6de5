//! Exponential backoff retry utility
//!
//! Used for transient failures against external collaborators: the initial
//! database connection at startup and the relay bus subscription.
//!
//! # Examples
//!
//! ```
//! use summithub_core::retry::{retry_with_backoff, RetryPolicy};
//!
//! async fn connect() -> Result<&'static str, std::io::Error> {
//!     Ok("connected")
//! }
//!
//! # async fn example() -> Result<(), std::io::Error> {
//! let conn = retry_with_backoff(
//!     || async { connect().await },
//!     RetryPolicy::startup(),
//!     |err: &std::io::Error| err.kind() == std::io::ErrorKind::ConnectionRefused,
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 means no retries, only initial attempt)
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Cap on the exponential growth
    pub max_delay: Duration,

    /// Whether to add up to 30% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    /// 3 retries, 100ms base, 5s cap, jitter on
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration, jitter: bool) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter,
        }
    }

    /// Policy for dependencies the service cannot start without
    ///
    /// 8 retries, 250ms base, 10s cap. Roughly a minute in total before giving up.
    pub fn startup() -> Self {
        Self {
            max_retries: 8,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }

    /// Policy for long-lived subscriptions that retry until shut down
    ///
    /// `max_retries` is unbounded; only the delay schedule matters.
    pub fn resubscribe() -> Self {
        Self {
            max_retries: u32::MAX,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// Delay to wait before retry number `attempt` (0-indexed)
    ///
    /// `min(base * 2^attempt, max)`, plus `random(0, delay * 0.3)` when jitter is on.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        let capped = base_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(max_ms);

        let jitter = if self.jitter {
            let range = (capped as f64 * 0.3) as u64;
            if range > 0 {
                rand::thread_rng().gen_range(0..=range)
            } else {
                0
            }
        } else {
            0
        };

        Duration::from_millis(capped.saturating_add(jitter))
    }
}

/// Retries an async operation with exponential backoff
///
/// Only errors for which `is_retryable` returns true are retried; anything
/// else, or the last error once `max_retries` is exhausted, is returned as is.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    mut operation: F,
    policy: RetryPolicy,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                tracing::debug!(attempt, "Operation succeeded");
                return Ok(result);
            }
            Err(error) => {
                if attempt >= policy.max_retries {
                    tracing::warn!(
                        attempt,
                        max_retries = policy.max_retries,
                        "All retry attempts exhausted"
                    );
                    return Err(error);
                }

                if !is_retryable(&error) {
                    tracing::debug!(attempt, "Error is not retryable, failing immediately");
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after delay"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
