//! The retry runner: wraps database calls with a per-endpoint retry
//! strategy, a per-attempt timeout and request cancellation.

use std::future::Future;
use std::time::Duration;

use pgway_core::retry::RetryStrategy;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{sql_state, DbError};

/// Classify a driver error: retry when the driver reports a closed/broken
/// connection, when the error carries no SQL state (network-level failure),
/// when the SQL state is in the connection-failure class `08xxx`, or when
/// the strategy's allowlist names it. Everything else fails immediately.
pub fn is_retryable(err: &tokio_postgres::Error, strategy: &RetryStrategy) -> bool {
    if err.is_closed() {
        return true;
    }
    match sql_state(err) {
        Some(state) => state.starts_with("08") || strategy.allows(&state),
        None => true,
    }
}

/// Runs one database operation with retry, timeout and cancellation.
pub struct RetryRunner {
    pub strategy: RetryStrategy,
    /// Per-attempt timeout; timeouts count as retryable attempts.
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl RetryRunner {
    pub fn new(strategy: RetryStrategy, timeout: Option<Duration>, cancel: CancellationToken) -> Self {
        RetryRunner {
            strategy,
            timeout,
            cancel,
        }
    }

    /// Run `op`, retrying per the strategy. Total attempts never exceed
    /// `1 + strategy.delays.len()`. Cancellation aborts immediately with no
    /// further attempts.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, DbError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, tokio_postgres::Error>>,
    {
        let mut errors: Vec<tokio_postgres::Error> = Vec::new();
        let mut timed_out = false;
        let max_attempts = self.strategy.max_attempts();

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = self.strategy.delays[attempt - 1];
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(DbError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let outcome = match self.timeout {
                Some(limit) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(DbError::Cancelled),
                        res = tokio::time::timeout(limit, op()) => res.ok(),
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(DbError::Cancelled),
                        res = op() => Some(res),
                    }
                }
            };

            match outcome {
                None => {
                    // Attempt timed out; timeouts are retryable.
                    timed_out = true;
                    debug!(attempt, "database attempt timed out");
                }
                Some(Ok(value)) => return Ok(value),
                Some(Err(err)) => {
                    if !is_retryable(&err, &self.strategy) {
                        return Err(DbError::Execute(err));
                    }
                    warn!(attempt, error = %err, "retryable database error");
                    timed_out = false;
                    errors.push(err);
                }
            }
        }

        if timed_out && errors.is_empty() {
            return Err(DbError::Timeout);
        }
        Err(DbError::RetryExhausted {
            attempts: max_attempts,
            errors,
        })
    }
}
