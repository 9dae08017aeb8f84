use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use outte_store::{FetchConfig, OutteError, OutteResult};

/// Bounded retry with exponential backoff between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { error: OutteError, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_result(self) -> OutteResult<T> {
        match self {
            RetryOutcome::Succeeded { value, .. } => Ok(value),
            RetryOutcome::Exhausted { error, .. } => Err(error),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_ms: u64, max_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_ms,
            max_ms,
        }
    }

    pub fn for_boards(config: &FetchConfig) -> Self {
        Self::new(
            config.board_attempts,
            config.backoff_base_ms,
            config.backoff_max_ms,
        )
    }

    pub fn for_replays(config: &FetchConfig) -> Self {
        Self::new(
            config.replay_attempts,
            config.backoff_base_ms,
            config.backoff_max_ms,
        )
    }

    /// Delay before the attempt following `attempts` failures.
    pub fn backoff_millis(&self, attempts: u32) -> u64 {
        if attempts == 0 {
            return self.base_ms.min(self.max_ms);
        }
        let shift = attempts.saturating_sub(1).min(10);
        self.base_ms.saturating_mul(1_u64 << shift).min(self.max_ms)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = OutteResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{label}: succeeded on attempt {attempt}");
                    }
                    return RetryOutcome::Succeeded {
                        value,
                        attempts: attempt,
                    };
                }
                Err(error) if !error.is_retryable() || attempt >= self.max_attempts => {
                    return RetryOutcome::Exhausted {
                        error,
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    let delay = self.backoff_millis(attempt);
                    warn!("{label}: attempt {attempt} failed ({error}), retrying in {delay}ms");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
            }
        }
    }
}
