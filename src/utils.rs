use std::future::Future;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::retry::RetryConfig;

#[derive(Debug)]
pub enum RetryError<E> {
    Cancelled { attempts: u32 },
    Exhausted { attempts: u32, error: E },
    Fatal { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Cancelled { attempts }
            | Self::Exhausted { attempts, .. }
            | Self::Fatal { attempts, .. } => *attempts,
        }
    }
}

/// Runs `operation` until it succeeds, fails with an error `is_transient`
/// rejects, or `max_attempts` is reached. Between attempts the delay starts at
/// `initial_delay` and is multiplied by `backoff_multiplier` each time.
///
/// The operation receives the 1-based attempt number. Cancellation is checked
/// while the operation runs and while backing off; a cancelled run is never
/// retried.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    is_transient: C,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
            outcome = operation(attempt) => outcome,
        };

        match outcome {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = config.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) if !is_transient(&e) => {
                warn!(attempt, error = %e, "Non-retryable failure, giving up");
                return Err(RetryError::Fatal {
                    attempts: attempt,
                    error: e,
                });
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        error: e,
                    });
                }

                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retry attempt failed, backing off"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Cancelled { attempts: attempt });
                    }
                    _ = sleep(delay) => {}
                }

                delay = config.next_delay(delay);
            }
        }
    }
}
