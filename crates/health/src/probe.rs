//! The health probe seam and its HTTP implementation.

use async_trait::async_trait;
use promptr_client::api::{ApiError, ApiTransport, PingResponse};
use promptr_core::circuit_breaker::CircuitOpenError;
use promptr_core::retry::RetryError;

/// Well-known health endpoint of the backend.
pub const HEALTH_PATH: &str = "/health";

/// One reachability check against the backend.
///
/// Implementations perform a single attempt; retries and the circuit
/// breaker are layered on by the monitor.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<PingResponse, ApiError>;
}

/// Successful guarded probe.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSuccess {
    pub ping: PingResponse,
    /// Attempts it took, 1 when the first attempt succeeded.
    pub attempts: u32,
}

/// Failed guarded probe.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The breaker rejected the probe; no request was made.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Every attempt inside the breaker failed.
    #[error("health probe failed: {0}")]
    Failed(#[source] RetryError<ApiError>),
}

/// `GET /health` over the shared transport.
///
/// Any answer below 500 counts as reachable; 5xx and transport failures
/// are errors.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    api: ApiTransport,
    path: String,
}

impl HttpHealthProbe {
    pub fn new(api: ApiTransport) -> Self {
        Self {
            api,
            path: HEALTH_PATH.to_string(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> Result<PingResponse, ApiError> {
        let segments: Vec<&str> = self.path.split('/').filter(|s| !s.is_empty()).collect();
        let ping = self.api.ping(&segments).await?;
        if ping.status >= 500 {
            return Err(ApiError::Http {
                status: ping.status,
                body: String::new(),
            });
        }
        Ok(ping)
    }
}
