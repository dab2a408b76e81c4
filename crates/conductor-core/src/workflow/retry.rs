//! Retry wrapper for step execution.
//!
//! A step is attempted up to `max_retries + 1` times. Between attempts the
//! wrapper sleeps `delay_ms`, then multiplies the delay by
//! `backoff_multiplier` (1.0 = constant delay). The last error is what
//! propagates when every attempt fails.

use std::future::Future;
use std::time::Duration;

use conductor_types::workflow::RetryConfig;

/// Result of a retried operation plus the number of attempts consumed.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Run `attempt` under the given retry policy.
///
/// `attempt` receives the 1-based attempt number. Uses `tokio::time::sleep`
/// for backoff, so paused-clock tests advance it virtually.
pub async fn run_with_retry<T, E, F, Fut>(config: &RetryConfig, mut attempt: F) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_retries.saturating_add(1);
    let mut delay_ms = config.delay_ms;

    for attempt_number in 1..=max_attempts {
        match attempt(attempt_number).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt_number,
                };
            }
            Err(error) => {
                if attempt_number == max_attempts {
                    return RetryOutcome {
                        result: Err(error),
                        attempts: attempt_number,
                    };
                }
                tracing::debug!(
                    attempt = attempt_number,
                    delay_ms,
                    "step attempt failed, backing off"
                );
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                delay_ms = (delay_ms as f64 * config.backoff_multiplier) as u64;
            }
        }
    }

    unreachable!("retry loop always returns from its final attempt");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
