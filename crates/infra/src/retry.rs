//! Retry with exponential backoff and jitter
//!
//! Wraps downstream calls whose failures are transient (rate limits,
//! server errors, network drops). Non-retryable errors surface on the
//! first attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use techsync_domain::{Result, SyncError};
use tracing::{debug, warn};

/// Retry policy with exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, max_delay, jitter_factor: 0.2 }
    }

    /// A policy that never retries, for tests and one-shot tools.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Run `operation`, retrying while the error is retryable and attempts
    /// remain. The last error is returned when attempts run out.
    pub async fn execute<T, F, Fut>(&self, label: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if attempt > 1 {
                        debug!(operation = label, attempt, error = %err, "giving up");
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Exponential delay for a (1-based) attempt number, jittered and
    /// capped at `max_delay`.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(2u32.saturating_pow(exp));
        let capped = raw.min(self.max_delay);

        let jitter_range = capped.as_secs_f64() * self.jitter_factor;
        if jitter_range <= f64::EPSILON {
            return capped;
        }
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        let jittered = (capped.as_secs_f64() + jitter).max(0.0);
        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()))
    }
}

/// Map a transport-level error onto the shared error taxonomy.
pub(crate) fn network_error(context: &str, err: reqwest::Error) -> SyncError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        SyncError::Network(format!("{context}: {err}"))
    } else {
        SyncError::Internal(format!("{context}: {err}"))
    }
}

/// Map a non-success HTTP status onto the shared error taxonomy.
pub(crate) fn status_error(context: &str, status: reqwest::StatusCode, body: &str) -> SyncError {
    let message = format!("{context}: HTTP {status}: {body}");
    match status.as_u16() {
        401 | 403 => SyncError::Auth(message),
        404 => SyncError::NotFound(message),
        429 => SyncError::RateLimit(message),
        500..=599 => SyncError::Server(message),
        _ => SyncError::Client(message),
    }
}
