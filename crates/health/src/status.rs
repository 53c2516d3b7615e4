//! Health snapshots published by the monitor.

use std::time::Duration;

use chrono::Utc;
use promptr_client::api::ApiError;
use promptr_core::circuit_breaker::CircuitSnapshot;
use promptr_core::types::Timestamp;
use serde::Serialize;

use crate::probe::{ProbeError, ProbeSuccess};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    /// No probe has completed yet.
    Unknown,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Immutable result of one probe; superseded by the next.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub response_time_ms: u64,
    pub uptime_description: String,
    pub last_checked: Timestamp,
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Breaker state right after the probe.
    pub circuit: CircuitSnapshot,
}

impl HealthStatus {
    /// Placeholder published before the first probe completes.
    pub fn unknown(circuit: CircuitSnapshot) -> Self {
        Self {
            status: HealthState::Unknown,
            response_time_ms: 0,
            uptime_description: "Not checked".to_string(),
            last_checked: Utc::now(),
            is_connected: false,
            error: None,
            circuit,
        }
    }

    /// Classify a probe outcome.
    ///
    /// - `Healthy`: 2xx on the first attempt within `degraded_latency`.
    /// - `Degraded`: reachable, but slow, non-2xx, or only after a retry.
    /// - `Unhealthy`: circuit open, or every attempt failed.  The
    ///   description names the kind of the last failure.
    pub fn from_probe(
        outcome: &Result<ProbeSuccess, ProbeError>,
        elapsed: Duration,
        degraded_latency: Duration,
        circuit: CircuitSnapshot,
    ) -> Self {
        match outcome {
            Ok(success) => {
                let ok = (200..300).contains(&success.ping.status);
                let slow = success.ping.latency > degraded_latency;
                let status = if ok && !slow && success.attempts <= 1 {
                    HealthState::Healthy
                } else {
                    HealthState::Degraded
                };
                Self {
                    status,
                    response_time_ms: millis(success.ping.latency),
                    uptime_description: "Connected".to_string(),
                    last_checked: Utc::now(),
                    is_connected: true,
                    error: (!ok)
                        .then(|| format!("health endpoint returned HTTP {}", success.ping.status)),
                    circuit,
                }
            }
            Err(ProbeError::CircuitOpen(e)) => Self {
                status: HealthState::Unhealthy,
                response_time_ms: 0,
                uptime_description: "Circuit open".to_string(),
                last_checked: Utc::now(),
                is_connected: false,
                error: Some(e.to_string()),
                circuit,
            },
            Err(e @ ProbeError::Failed(failed)) => Self {
                status: HealthState::Unhealthy,
                response_time_ms: millis(elapsed),
                uptime_description: failure_description(failed.last_error()),
                last_checked: Utc::now(),
                is_connected: false,
                error: Some(e.to_string()),
                circuit,
            },
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

fn failure_description(error: &ApiError) -> String {
    match error {
        ApiError::Network(e) if e.is_timeout() => "Request timeout".to_string(),
        ApiError::Network(_) => "Network error".to_string(),
        ApiError::Http { status, .. } if *status >= 500 => format!("Server error (HTTP {status})"),
        ApiError::Http { status, .. } => format!("Unexpected response (HTTP {status})"),
        ApiError::InvalidResponse(_) => "Invalid response".to_string(),
        ApiError::InvalidUrl(_) => "Invalid backend URL".to_string(),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
