//! Retry Logic
//!
//! Exponential backoff retry loop shared by credential refresh and partner
//! API requests. Operations report each attempt as an [`Attempt`], so the
//! loop never inspects error messages to decide whether to retry.

use crate::error::Attempt;
use crate::utils::clock::Sleeper;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff
///
/// Attempt `k` (1-based) that fails retryably is followed by a wait of
/// `base_delay * 2^(k-1)` before attempt `k + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,
    /// Wait after the first failed attempt
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff to wait after failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Terminal failure of a retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryFailure<E> {
    /// Every attempt failed retryably
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with a non-retryable error
    Fatal { attempt: u32, error: E },
}

impl<E> RetryFailure<E> {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            RetryFailure::Exhausted { attempts, .. } => *attempts,
            RetryFailure::Fatal { attempt, .. } => *attempt,
        }
    }

    pub fn into_error(self) -> E {
        match self {
            RetryFailure::Exhausted { last, .. } => last,
            RetryFailure::Fatal { error, .. } => error,
        }
    }
}

/// Run `operation` until it succeeds, fails fatally, or the policy's attempt
/// budget is spent.
///
/// **Algorithm:**
/// 1. Call `operation(attempt)`
/// 2. `Ok` → return the value
/// 3. `Fatal` → return immediately, no backoff
/// 4. `Retryable` → if attempts remain, wait `policy.delay_for(attempt)` on
///    `sleeper` and go to 1; otherwise return `Exhausted`
pub async fn retry_with_backoff<T, E, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut operation: F,
) -> Result<T, RetryFailure<E>>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying operation");
        }

        match operation(attempt).await {
            Attempt::Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Attempt::Fatal(error) => {
                tracing::debug!(
                    operation = operation_name,
                    attempt,
                    error = %error,
                    "Operation failed with non-retryable error"
                );
                return Err(RetryFailure::Fatal { attempt, error });
            }
            Attempt::Retryable(error) => {
                if attempt >= policy.max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %error,
                        "Operation failed: retry budget exhausted"
                    );
                    return Err(RetryFailure::Exhausted {
                        attempts: attempt,
                        last: error,
                    });
                }

                let backoff = policy.delay_for(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "Transient failure, will retry after backoff"
                );

                sleeper.sleep(backoff).await;
            }
        }
    }
}
