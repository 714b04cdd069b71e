use std::future::Future;
use std::time::Duration;

use halyard_core::ResourceAddr;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::{FailureReason, RemoteError};

/// Bounded exponential backoff with optional jitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 5000,
            use_jitter: true,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            base_backoff_ms,
            max_backoff_ms,
            use_jitter: true,
        }
    }

    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Delay before the attempt following `attempt` (1-based).
    #[must_use]
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
        let capped_delay = self
            .base_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);

        if self.use_jitter {
            let jitter_range = (capped_delay / 4).max(1);
            let jitter = rand::random::<u64>() % (2 * jitter_range);
            Duration::from_millis(capped_delay.saturating_add(jitter))
        } else {
            Duration::from_millis(capped_delay)
        }
    }

    #[must_use]
    pub fn is_retryable(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Sleep for the backoff after `attempt`, or return `false` early if the
/// run is cancelled meanwhile.
pub(crate) async fn backoff(policy: &RetryPolicy, attempt: u32, cancel: &CancelToken) -> bool {
    let delay = policy.calculate_backoff(attempt);
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Run one remote call, retrying [`RemoteError::Transient`] under `policy`.
///
/// Every retry is added to `retries`. Non-transient errors are returned
/// immediately. Cancellation is checked before each attempt.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    addr: &ResourceAddr,
    operation: &str,
    retries: &mut u32,
    mut call: F,
) -> Result<T, FailureReason>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(FailureReason::Cancelled);
        }
        match call().await {
            Ok(value) => return Ok(value),
            Err(RemoteError::Transient(message)) => {
                if !policy.is_retryable(attempt) {
                    return Err(FailureReason::TransientExhausted {
                        attempts: attempt,
                        last: message,
                    });
                }
                tracing::warn!(
                    addr = %addr,
                    operation,
                    attempt,
                    error = %message,
                    "transient remote error, backing off"
                );
                if !backoff(policy, attempt, cancel).await {
                    return Err(FailureReason::Cancelled);
                }
                *retries += 1;
                attempt += 1;
            }
            Err(e) => return Err(FailureReason::Remote(e)),
        }
    }
}
