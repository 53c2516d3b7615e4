//! Three-state circuit breaker guarding a single call path.
//!
//! # State transitions
//!
//! ```text
//! Closed   -> Open     : failure_count reaches failure_threshold
//! Open     -> HalfOpen : first call attempt once the cooldown has elapsed (lazy)
//! HalfOpen -> Closed   : the single probe call succeeds
//! HalfOpen -> Open     : the single probe call fails (cooldown restarts)
//! any      -> Closed   : manual reset
//! ```
//!
//! [`CircuitBreaker`] is a plain state struct mutated only through the
//! named transition methods.  [`SharedCircuitBreaker`] serialises those
//! transitions behind a mutex and wraps an async call path.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::CoreError;

/// Default number of consecutive failures that opens the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time the circuit stays open before a half-open probe.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed,
    /// Failing fast, calls are rejected without being attempted.
    Open,
    /// Cooldown elapsed, a single probe call is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreakerConfig {
    /// Validate and build a breaker configuration.
    ///
    /// `failure_threshold` must be greater than zero.
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Result<Self, CoreError> {
        if failure_threshold == 0 {
            return Err(CoreError::Validation(
                "circuit breaker failure threshold must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            failure_threshold,
            cooldown,
        })
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// The breaker rejected a call without attempting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit open, next probe allowed in {}ms", remaining.as_millis())]
pub struct CircuitOpenError {
    /// Time left until a half-open probe may be attempted.
    pub remaining: Duration,
}

/// Serializable point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    /// Milliseconds until the next probe is allowed (0 unless open).
    pub next_probe_in_ms: u64,
}

/// Explicit breaker state.
///
/// Invariants: `Open` always has `opened_at` set; `Closed` always has
/// `failure_count < failure_threshold`.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    /// Set while the half-open probe is outstanding.
    probe_started_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            probe_started_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask permission to make a protected call now.
    pub fn try_acquire(&mut self) -> Result<(), CircuitOpenError> {
        self.try_acquire_at(Instant::now())
    }

    /// Ask permission to make a protected call at `now`.
    ///
    /// An open breaker whose cooldown has elapsed moves to `HalfOpen` and
    /// admits exactly one probe; further calls are rejected until that
    /// probe reports back.  A probe that never reports back is considered
    /// abandoned after another full cooldown.
    pub fn try_acquire_at(&mut self, now: Instant) -> Result<(), CircuitOpenError> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let remaining = self.remaining_cooldown_at(now);
                if !remaining.is_zero() {
                    return Err(CircuitOpenError { remaining });
                }
                self.state = CircuitState::HalfOpen;
                self.probe_started_at = Some(now);
                tracing::info!(
                    failure_count = self.failure_count,
                    "Circuit breaker half-open, admitting probe",
                );
                Ok(())
            }
            CircuitState::HalfOpen => match self.probe_started_at {
                Some(started) if now.duration_since(started) < self.config.cooldown => {
                    Err(CircuitOpenError {
                        remaining: Duration::ZERO,
                    })
                }
                _ => {
                    self.probe_started_at = Some(now);
                    Ok(())
                }
            },
        }
    }

    /// Report that a protected call succeeded.
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::HalfOpen => {
                tracing::info!("Circuit breaker probe succeeded, closing circuit");
                self.close();
            }
            // A call admitted before the circuit opened; the cooldown stands.
            CircuitState::Open => {}
        }
    }

    /// Report that a protected call failed.
    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&mut self, now: Instant) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        failure_count = self.failure_count,
                        cooldown_ms = self.config.cooldown.as_millis() as u64,
                        "Circuit breaker opened",
                    );
                    self.open(now);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    cooldown_ms = self.config.cooldown.as_millis() as u64,
                    "Circuit breaker probe failed, reopening circuit",
                );
                self.open(now);
            }
            CircuitState::Open => {}
        }
    }

    /// Operator-triggered recovery: force the breaker closed.
    pub fn reset(&mut self) {
        tracing::info!(previous = %self.state, "Circuit breaker manually reset");
        self.close();
    }

    /// Time left until a probe may be attempted (zero unless open).
    pub fn remaining_cooldown_at(&self, now: Instant) -> Duration {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened)) => {
                self.config.cooldown.saturating_sub(now.duration_since(opened))
            }
            _ => Duration::ZERO,
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            failure_threshold: self.config.failure_threshold,
            next_probe_in_ms: self.remaining_cooldown_at(now).as_millis() as u64,
        }
    }

    // ---- private helpers ----

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_started_at = None;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
        self.probe_started_at = None;
    }
}

/// Outcome of a call made through a [`SharedCircuitBreaker`].
#[derive(Debug, thiserror::Error)]
pub enum GuardedError<E> {
    /// The breaker rejected the call; the operation was not invoked.
    #[error(transparent)]
    Open(CircuitOpenError),

    /// The operation ran and failed; the failure was recorded.
    #[error(transparent)]
    Failed(E),
}

/// A [`CircuitBreaker`] behind a single mutex, shareable across tasks.
///
/// The lock is never held across the protected call itself.
#[derive(Debug)]
pub struct SharedCircuitBreaker {
    inner: Mutex<CircuitBreaker>,
}

impl SharedCircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(CircuitBreaker::new(config)),
        }
    }

    /// Run `operation` if the breaker admits it and record the outcome.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, GuardedError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.lock().try_acquire().map_err(GuardedError::Open)?;

        match operation().await {
            Ok(value) => {
                self.lock().record_success();
                Ok(value)
            }
            Err(e) => {
                self.lock().record_failure();
                Err(GuardedError::Failed(e))
            }
        }
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state()
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        self.lock().snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
