use std::time::Duration;

use promptr_core::circuit_breaker::{CircuitBreakerConfig, DEFAULT_COOLDOWN, DEFAULT_FAILURE_THRESHOLD};
use promptr_core::env::var_or;
use promptr_core::retry::RetryOptions;

/// Default time between scheduled probes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Default delay before the first scheduled probe after start.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(3);

/// Default latency above which a reachable backend is reported degraded.
pub const DEFAULT_DEGRADED_LATENCY: Duration = Duration::from_millis(5000);

/// Shortest allowed time between scheduled probes.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Default attempt budget inside one guarded probe.
pub const DEFAULT_PROBE_MAX_ATTEMPTS: u32 = 2;

/// Health monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub initial_delay: Duration,
    pub breaker: CircuitBreakerConfig,
    /// Latency above which a successful probe is [`Degraded`](crate::HealthState::Degraded).
    pub degraded_latency: Duration,
    /// Retry budget applied inside the breaker's protected call.
    pub probe_retry: RetryOptions,
    /// How long [`shutdown`](crate::HealthMonitor::shutdown) waits for the timer task.
    pub shutdown_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            initial_delay: DEFAULT_INITIAL_DELAY,
            breaker: CircuitBreakerConfig::default(),
            degraded_latency: DEFAULT_DEGRADED_LATENCY,
            probe_retry: probe_retry_options(DEFAULT_PROBE_MAX_ATTEMPTS),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `HEALTH_CHECK_INTERVAL_SECS` | `30`    |
    /// | `HEALTH_INITIAL_DELAY_SECS`  | `3`     |
    /// | `HEALTH_FAILURE_THRESHOLD`   | `5`     |
    /// | `HEALTH_COOLDOWN_SECS`       | `60`    |
    /// | `HEALTH_DEGRADED_LATENCY_MS` | `5000`  |
    /// | `HEALTH_PROBE_MAX_ATTEMPTS`  | `2`     |
    pub fn from_env() -> Self {
        let threshold = var_or("HEALTH_FAILURE_THRESHOLD", DEFAULT_FAILURE_THRESHOLD);
        let cooldown = Duration::from_secs(var_or("HEALTH_COOLDOWN_SECS", DEFAULT_COOLDOWN.as_secs()));
        let breaker = CircuitBreakerConfig::new(threshold, cooldown).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid circuit breaker settings, using defaults");
            CircuitBreakerConfig::default()
        });

        Self {
            interval: clamp_interval(Duration::from_secs(var_or(
                "HEALTH_CHECK_INTERVAL_SECS",
                DEFAULT_INTERVAL.as_secs(),
            ))),
            initial_delay: Duration::from_secs(var_or(
                "HEALTH_INITIAL_DELAY_SECS",
                DEFAULT_INITIAL_DELAY.as_secs(),
            )),
            breaker,
            degraded_latency: Duration::from_millis(var_or("HEALTH_DEGRADED_LATENCY_MS", 5000)),
            probe_retry: probe_retry_options(var_or(
                "HEALTH_PROBE_MAX_ATTEMPTS",
                DEFAULT_PROBE_MAX_ATTEMPTS,
            )),
            ..Self::default()
        }
    }

    /// Set the probe interval; values below [`MIN_INTERVAL`] are raised to it.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = clamp_interval(interval);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_probe_attempts(mut self, max_attempts: u32) -> Self {
        self.probe_retry = probe_retry_options(max_attempts);
        self
    }
}

fn clamp_interval(interval: Duration) -> Duration {
    if interval < MIN_INTERVAL {
        tracing::warn!(
            interval_ms = interval.as_millis() as u64,
            min_ms = MIN_INTERVAL.as_millis() as u64,
            "Health check interval too short, using minimum",
        );
        return MIN_INTERVAL;
    }
    interval
}

/// Short backoff so a network blip does not count against the breaker.
fn probe_retry_options(max_attempts: u32) -> RetryOptions {
    RetryOptions::new(max_attempts)
        .with_initial_delay(Duration::from_millis(250))
        .with_backoff_factor(2.0)
        .with_max_delay(Duration::from_secs(2))
        .with_context("operation", "health_probe")
}
