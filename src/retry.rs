//! Bounded retry loop shared by the transfer engines
//!
//! Both engines drive their attempts through [`resilient_transfer`]. The loop makes
//! at most [`RetryPolicy::max_attempts`] attempts, picks the wait between attempts
//! from the failing error (stalls wait longer than generic failures) and stops
//! immediately on an error that reports itself as not retryable.
//!
//! # Example
//!
//! ```no_run
//! use satfetch::config::RetryPolicy;
//! use satfetch::retry::{IsRetryable, resilient_transfer};
//!
//! #[derive(Debug)]
//! struct Busy;
//!
//! impl std::fmt::Display for Busy {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         f.write_str("server busy")
//!     }
//! }
//!
//! impl IsRetryable for Busy {
//!     fn is_retryable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! # async fn example() {
//! let policy = RetryPolicy::default();
//! let outcome = resilient_transfer(&policy, "example", |attempt| async move {
//!     if attempt < 2 { Err(Busy) } else { Ok(attempt) }
//! })
//! .await;
//! assert_eq!(outcome.attempts, 2);
//! # }
//! ```

use crate::config::RetryPolicy;
use crate::error::TransferError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the operation should be attempted again
    fn is_retryable(&self) -> bool;

    /// How long to wait before the next attempt
    fn retry_delay(&self, policy: &RetryPolicy) -> Duration {
        policy.retry_delay
    }
}

/// Every transfer failure is retried; a stall waits a little longer so the
/// server can release the previous data connection.
impl IsRetryable for TransferError {
    fn is_retryable(&self) -> bool {
        true
    }

    fn retry_delay(&self, policy: &RetryPolicy) -> Duration {
        match self {
            TransferError::StallTimeout { .. } => policy.stall_retry_delay,
            _ => policy.retry_delay,
        }
    }
}

/// Result of a retried operation together with the number of attempts it took
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Final result: the first success, or the error of the last attempt
    pub result: Result<T, E>,
    /// Attempts actually made (at least 1)
    pub attempts: u32,
}

/// Run `attempt_fn` until it succeeds, fails permanently, or the policy's
/// attempt budget is used up
///
/// `attempt_fn` receives the 1-based attempt number. `label` is only used for
/// log output (normally the file name being transferred).
pub async fn resilient_transfer<F, Fut, T, E>(
    policy: &RetryPolicy,
    label: &str,
    mut attempt_fn: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match attempt_fn(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(label, attempts = attempt, "transfer succeeded after retry");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = e.retry_delay(policy);
                let delay = if policy.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tracing::warn!(
                    label,
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed, retrying"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        label,
                        error = %e,
                        attempts = attempt,
                        "giving up after all attempts failed"
                    );
                } else {
                    tracing::error!(label, error = %e, "failed with non-retryable error");
                }
                return RetryOutcome {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}

/// Stretch a delay by a random factor between 1x and 2x
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + factor))
}
