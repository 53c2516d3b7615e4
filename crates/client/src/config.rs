use std::time::Duration;

use promptr_core::env::var_or;
use promptr_core::retry::RetryOptions;

/// Default backend base URL for local development.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry budgets for the two classes of batch operations.
///
/// Reads are always safe to repeat and get the larger budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub read: RetryOptions,
    pub write: RetryOptions,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(4, 2, Duration::from_millis(500))
    }
}

impl RetryPolicy {
    pub fn new(read_attempts: u32, write_attempts: u32, initial_delay: Duration) -> Self {
        let base = |attempts: u32| {
            RetryOptions::new(attempts)
                .with_initial_delay(initial_delay)
                .with_backoff_factor(2.0)
                .with_max_delay(Duration::from_secs(10))
        };
        Self {
            read: base(read_attempts),
            write: base(write_attempts),
        }
    }
}

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL (default: `http://localhost:5000`).
    pub base_url: String,
    /// Per-request timeout (default: 30s).
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl ClientConfig {
    /// Default settings against the given backend.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                 |
    /// |----------------------------------|-------------------------|
    /// | `PROMPTR_BASE_URL`               | `http://localhost:5000` |
    /// | `PROMPTR_REQUEST_TIMEOUT_SECS`   | `30`                    |
    /// | `PROMPTR_READ_MAX_ATTEMPTS`      | `4`                     |
    /// | `PROMPTR_WRITE_MAX_ATTEMPTS`     | `2`                     |
    /// | `PROMPTR_RETRY_INITIAL_DELAY_MS` | `500`                   |
    pub fn from_env() -> Self {
        let base_url = var_or("PROMPTR_BASE_URL", DEFAULT_BASE_URL.to_string());
        let request_timeout = Duration::from_secs(var_or(
            "PROMPTR_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT.as_secs(),
        ));
        let retry = RetryPolicy::new(
            var_or("PROMPTR_READ_MAX_ATTEMPTS", 4),
            var_or("PROMPTR_WRITE_MAX_ATTEMPTS", 2),
            Duration::from_millis(var_or("PROMPTR_RETRY_INITIAL_DELAY_MS", 500)),
        );

        Self {
            base_url,
            request_timeout,
            retry,
        }
    }
}
