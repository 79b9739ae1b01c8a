//! Retry with exponential backoff for whole-transfer attempts
//!
//! Failures are classified through [`S3Error::is_retryable`]; transient ones
//! are retried after `min(max_delay, base * 2^n + jitter)` until the attempt
//! budget runs out. The final failure is wrapped in [`S3Error::Terminal`]
//! carrying the number of attempts made.
//!
//! # Examples
//!
//! ```no_run
//! use clouddeck::protocol::s3::recovery::{with_retry, RetryPolicy};
//! use clouddeck::protocol::s3::S3Error;
//!
//! # async fn demo() -> Result<(), S3Error> {
//! let policy = RetryPolicy::transfer();
//! let (value, context) = with_retry(&policy, |_, _| {}, |_attempt| async {
//!     Ok::<_, S3Error>(42)
//! })
//! .await?;
//! assert_eq!(value, 42);
//! assert_eq!(context.attempts, 1);
//! # Ok(())
//! # }
//! ```

use super::error::{ErrorClass, S3Error, S3Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound of any single delay
    pub max_delay: Duration,

    /// Random extra delay, uniform in `[0, jitter)`
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::transfer()
    }
}

impl RetryPolicy {
    /// Whole-transfer retries: 4 attempts, 1 s base
    pub fn transfer() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
        }
    }

    /// Per-request retries inside the transport: 3 attempts, 1 s base
    pub fn connection() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(20),
            jitter: Duration::from_secs(1),
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::transfer()
        }
    }

    /// Delay before retry `retry` (0-indexed) without jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }

    /// Delay before retry `retry` (0-indexed), jitter included
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            let millis = self.jitter.as_millis().min(u64::MAX as u128) as u64;
            Duration::from_millis(rand::rng().random_range(0..millis.max(1)))
        };

        self.backoff(retry).saturating_add(jitter).min(self.max_delay)
    }
}

/// State of one retried operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryContext {
    /// Attempts made so far
    pub attempts: u32,

    /// Class of the last failure
    pub last_class: Option<ErrorClass>,

    /// Delay before the next attempt, if one is scheduled
    pub next_delay: Option<Duration>,

    /// Sum of all delays
    pub total_delay: Duration,

    /// Every delay waited, in order
    pub delays: Vec<Duration>,
}

impl RetryContext {
    /// Create a new retry context
    pub fn new() -> Self {
        Self::default()
    }

    fn schedule(&mut self, delay: Duration) {
        self.next_delay = Some(delay);
        self.total_delay += delay;
        self.delays.push(delay);
    }
}

/// Run `operation` until it succeeds, fails terminally or exhausts the policy.
///
/// `operation` receives the 1-based attempt number. `on_retry` is called once
/// per scheduled retry, before the backoff sleep.
pub async fn with_retry<F, Fut, T, R>(
    policy: &RetryPolicy,
    mut on_retry: R,
    mut operation: F,
) -> S3Result<(T, RetryContext)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = S3Result<T>>,
    R: FnMut(&RetryContext, &S3Error),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut context = RetryContext::new();

    loop {
        context.attempts += 1;
        context.next_delay = None;

        match operation(context.attempts).await {
            Ok(value) => return Ok((value, context)),
            Err(error) => {
                context.last_class = Some(error.class());

                if !error.is_retryable() || context.attempts >= max_attempts {
                    return Err(S3Error::Terminal {
                        attempts: context.attempts,
                        source: Box::new(error),
                    });
                }

                let delay = policy.calculate_delay(context.attempts - 1);
                context.schedule(delay);
                warn!(
                    attempt = context.attempts,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient failure, retrying"
                );
                on_retry(&context, &error);
                sleep(delay).await;
            }
        }
    }
}
