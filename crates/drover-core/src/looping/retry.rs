//! Retry policy for engine invocations.
//!
//! Failures are classified by matching their message against known
//! transient signatures. The invocation's own deadline is never retried:
//! a command that hung once will hang again.

use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::ExecError;

/// Substrings (lowercase) that mark a failure as transient.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "rate limit",
    "rate_limit",
    "too many requests",
    "overloaded",
    "connection reset",
    "econnreset",
    "connection refused",
    "broken pipe",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "timed out",
    "timeout",
    "temporarily unavailable",
];

/// HTTP status codes that mark a failure as transient. They only match as a
/// whole number, never inside a longer one or an identifier.
const TRANSIENT_STATUS_CODES: &[&str] = &["429", "502", "503", "504", "529"];

/// Message prefix of the invocation deadline, see [`ExecError::TimedOut`].
const EXECUTION_TIMEOUT: &str = "execution timed out";

/// Attempt budget and backoff curve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (0-based):
    /// `min(base * 2^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Whether a failure message matches a transient signature.
pub fn is_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    if lower.contains(EXECUTION_TIMEOUT) {
        return false;
    }
    TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig))
        || lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| TRANSIENT_STATUS_CODES.contains(&word))
}

/// Why one attempt did not produce a usable outcome.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// The engine ran to the end but reported failure.
    #[error("{0}")]
    Unsuccessful(String),
}

impl AttemptError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Exec(e) if e.is_fatal() => false,
            other => is_retryable(&other.to_string()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AttemptError::Exec(e) if e.is_cancelled())
    }

    fn partial_output(&self) -> String {
        match self {
            AttemptError::Exec(e) => e.partial_output().unwrap_or_default().to_string(),
            AttemptError::Unsuccessful(_) => String::new(),
        }
    }
}

/// Run `op` until it succeeds, fails permanently or the budget runs out.
///
/// `op` receives the 0-based attempt number. Backoff sleeps end early when
/// `cancel` fires, returning a cancellation that keeps the last attempt's
/// partial output.
pub async fn execute_with_retry<'a, T, F>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, AttemptError>
where
    F: FnMut(u32) -> BoxFuture<'a, Result<T, AttemptError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let last = attempt + 1 >= attempts;
        if !err.is_retryable() || last {
            if err.is_retryable() {
                warn!(attempts, error = %err, "retry budget exhausted");
            }
            return Err(err);
        }

        let delay = policy.delay_for(attempt);
        warn!(
            attempt = attempt + 1,
            max_attempts = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("retry backoff cancelled");
                return Err(AttemptError::Exec(ExecError::Cancelled {
                    partial_output: err.partial_output(),
                }));
            }
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
