//! Per-item retry with exponential backoff

use std::thread;
use std::time::Duration;

use super::CancellationFlag;

/// Retry schedule: up to `attempts` tries, sleeping `base_delay * 2^n` after the n-th failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

/// Final result of a retried operation and how many tries it took
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
        }
    }

    /// Delay slept after the failed try with zero-based index `attempt`
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(20))
    }

    /// Run `op` until it succeeds, tries run out, or `cancel` is raised
    ///
    /// At least one try is always made. The surfaced error is the one from the
    /// last try.
    pub fn run<T, E, F>(&self, cancel: &CancellationFlag, mut op: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        let max = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt + 1,
                    };
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max || cancel.is_cancelled() {
                        return RetryOutcome {
                            result: Err(e),
                            attempts: attempt,
                        };
                    }
                    let delay = self.delay_after(attempt - 1);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying item");
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    if cancel.is_cancelled() {
                        return RetryOutcome {
                            result: Err(e),
                            attempts: attempt,
                        };
                    }
                }
            }
        }
    }
}
