//! Retry-with-backoff executor.
//!
//! [`execute`] runs a fallible async operation up to
//! [`RetryOptions::max_attempts`] times.  After each failed attempt the
//! executor sleeps for the current delay (without blocking the runtime)
//! and multiplies the delay by [`RetryOptions::backoff_factor`] before
//! the next attempt.  A final failure is always returned as an explicit
//! [`RetryError`], never swallowed.
//!
//! # Backoff schedule (defaults)
//!
//! | Failed attempt | Delay before next attempt |
//! |----------------|---------------------------|
//! | 1              | 1s                        |
//! | 2              | 2s                        |
//! | 3              | (exhausted)               |

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::types::DiagnosticContext;

/// Default number of attempts (including the first one).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the second attempt.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Default growth factor applied to the delay after every failure.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Per-call retry parameters.
///
/// `max_attempts` below 1 is treated as 1 and `backoff_factor` below 1
/// (or NaN) is treated as 1 when the options are executed.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between the first and the second attempt.
    pub initial_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub backoff_factor: f64,
    /// Optional upper bound on any single delay.
    pub max_delay: Option<Duration>,
    /// Key/value pairs attached to every attempt log line.
    pub context: DiagnosticContext,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay: None,
            context: DiagnosticContext::new(),
        }
    }
}

impl RetryOptions {
    /// Options with the given attempt budget and default backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// A single attempt with no retry.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Attach a diagnostic key/value pair reported with each failed attempt.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    fn effective_backoff_factor(&self) -> f64 {
        // `f64::max` maps NaN to the other operand.
        self.backoff_factor.max(1.0)
    }
}

/// Calculate the next backoff delay from the current delay and options.
///
/// The result is clamped to [`RetryOptions::max_delay`] when one is set,
/// and saturates instead of overflowing.
pub fn next_delay(current: Duration, options: &RetryOptions) -> Duration {
    let next_secs = current.as_secs_f64() * options.effective_backoff_factor();
    let next = Duration::try_from_secs_f64(next_secs).unwrap_or(Duration::MAX);
    match options.max_delay {
        Some(max) => next.min(max),
        None => next,
    }
}

/// Classification of an error for retry purposes.
pub trait Retryable {
    /// Whether repeating the failed operation may succeed.
    fn is_retryable(&self) -> bool;
}

/// Terminal failure returned by the executor.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last underlying error.
    #[error("operation failed after {attempts} attempts: {last}")]
    Exhausted {
        /// The configured attempt budget.
        attempts: u32,
        #[source]
        last: E,
    },

    /// An attempt failed with an error classified as non-retryable.
    #[error("operation failed on attempt {attempt} with a non-retryable error: {error}")]
    Aborted {
        /// 1-based number of the attempt that failed.
        attempt: u32,
        #[source]
        error: E,
    },
}

impl<E> RetryError<E> {
    /// The underlying error of the final attempt.
    pub fn last_error(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }

    /// Consume the wrapper and return the final underlying error.
    pub fn into_last_error(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }

    /// Number of attempts actually made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Aborted { attempt, .. } => *attempt,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Run `operation` with retries, classifying errors via [`Retryable`].
///
/// `operation` receives the 0-based attempt number.
pub async fn execute<T, E, F, Fut>(options: &RetryOptions, operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    execute_with(options, operation, E::is_retryable).await
}

/// Run `operation` with retries, using `should_retry` to decide whether
/// a failed attempt may be repeated.
///
/// A success returns immediately with no further attempt and no trailing
/// delay.  A non-retryable error returns [`RetryError::Aborted`] at once.
pub async fn execute_with<T, E, F, Fut, C>(
    options: &RetryOptions,
    mut operation: F,
    should_retry: C,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = options.effective_max_attempts();
    let mut delay = options.initial_delay;
    let mut attempt = 0u32;

    loop {
        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        attempt = attempt + 1,
                        max_attempts,
                        context = ?options.context,
                        "Operation succeeded after retry",
                    );
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        attempt += 1;

        if !should_retry(&error) {
            tracing::warn!(
                attempt,
                max_attempts,
                context = ?options.context,
                error = %error,
                "Attempt failed with a non-retryable error",
            );
            return Err(RetryError::Aborted { attempt, error });
        }

        if attempt >= max_attempts {
            tracing::error!(
                attempt,
                max_attempts,
                context = ?options.context,
                error = %error,
                "All attempts failed",
            );
            return Err(RetryError::Exhausted {
                attempts: max_attempts,
                last: error,
            });
        }

        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            context = ?options.context,
            error = %error,
            "Attempt failed, retrying",
        );

        tokio::time::sleep(delay).await;
        delay = next_delay(delay, options);
    }
}
