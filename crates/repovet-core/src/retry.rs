//! Exponential backoff with jitter for calls to external collaborators.
//!
//! Both the code-hosting client and the model client wrap every request in
//! [`retry_with_backoff`]; nothing above them retries.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::RepovetError;

/// Backoff schedule.
///
/// The delay before retry `n` (0-based) is `min(base * 2^n, max)` plus a
/// uniform jitter in `[0, jitter_ms)`. A provider rate-limit hint raises the
/// delay to at least the hinted value, still capped at `max_delay_ms`.
///
/// # Examples
///
/// ```
/// use repovet_core::RetryPolicy;
///
/// let policy = RetryPolicy { max_attempts: 5, base_delay_ms: 1000, max_delay_ms: 5000, jitter_ms: 0 };
/// assert_eq!(policy.backoff_ms(0, None), 1000);
/// assert_eq!(policy.backoff_ms(2, None), 4000);
/// assert_eq!(policy.backoff_ms(6, None), 5000);
/// assert_eq!(policy.backoff_ms(0, Some(3)), 3000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on a single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Exclusive upper bound of the random jitter added to each delay.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
        }
    }

    /// Deterministic part of the delay before retry `attempt`.
    pub fn backoff_ms(&self, attempt: u32, retry_after_secs: Option<u64>) -> u64 {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        let mut delay = exp.min(self.max_delay_ms);
        if let Some(secs) = retry_after_secs {
            delay = delay.max(secs.saturating_mul(1000)).min(self.max_delay_ms);
        }
        delay
    }

    fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.backoff_ms(attempt, retry_after_secs) + jitter)
    }
}

/// Run `op` until it succeeds, fails fatally, or exhausts `policy`.
///
/// Non-retryable errors (see [`RepovetError::is_retryable`]) are returned
/// unchanged on first occurrence. When the attempt budget runs out on a
/// retryable error the result is [`RepovetError::RetriesExhausted`].
///
/// # Examples
///
/// ```
/// use repovet_core::{retry_with_backoff, RepovetError, RetryPolicy};
///
/// let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
/// let out = rt.block_on(retry_with_backoff(&RetryPolicy::none(), "ping", || async {
///     Ok::<_, RepovetError>("pong")
/// }));
/// assert_eq!(out.unwrap(), "pong");
/// ```
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RepovetError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RepovetError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(RepovetError::RetriesExhausted {
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
                let delay = policy.delay_for(attempt - 1, err.retry_after_secs());
                warn!(
                    call = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
