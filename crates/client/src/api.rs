//! HTTP transport for the automation backend.
//!
//! Wraps a [`reqwest::Client`] bound to one backend base URL.  Endpoints
//! are given as path segments, each percent-encoded on its own, so an
//! opaque job id always stays a single segment.  Every request carries a
//! fresh `x-request-id` so attempts can be correlated with backend logs.
//! Bodies are decoded from text so that malformed payloads surface as
//! [`ApiError::InvalidResponse`] rather than as a transport failure.

use std::time::{Duration, Instant};

use promptr_core::retry::Retryable;
use reqwest::header::{HeaderName, HeaderValue, ACCEPT};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Header carrying the per-attempt correlation id.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Errors from the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request itself failed (connection, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("backend returned HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The backend answered 2xx with a body that is not a valid entity.
    #[error("invalid response from backend: {0}")]
    InvalidResponse(String),

    /// The base URL cannot be combined with an endpoint path.
    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// HTTP status code, when the backend answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Network(e) => e.status().map(|s| s.as_u16()),
            ApiError::InvalidResponse(_) | ApiError::InvalidUrl(_) => None,
        }
    }

    /// Whether the failure proves the request never reached the backend.
    ///
    /// Only these failures are safe to repeat for state-changing calls.
    pub fn is_undelivered(&self) -> bool {
        matches!(self, ApiError::Network(e) if e.is_connect())
    }
}

impl Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(e) => !e.is_builder(),
            ApiError::Http { status, .. } => {
                let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                status.is_server_error()
                    || status == StatusCode::REQUEST_TIMEOUT
                    || status == StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::InvalidResponse(_) | ApiError::InvalidUrl(_) => false,
        }
    }
}

/// Result of a bare reachability request (used by health probes).
#[derive(Debug, Clone, Copy)]
pub struct PingResponse {
    pub status: u16,
    pub latency: Duration,
}

/// HTTP client for a single backend instance.
#[derive(Debug, Clone)]
pub struct ApiTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ApiTransport {
    /// Create a transport with its own connection pool and request timeout.
    ///
    /// * `base_url` - e.g. `http://localhost:5000`; a trailing slash is ignored.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a transport reusing an existing [`reqwest::Client`]
    /// (useful for sharing one connection pool between the batch client
    /// and the health probe).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /{segments..}` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        let url = self.url(segments)?;
        let response = self.send(self.client.get(url.clone()), "GET", &url).await?;
        Self::parse_response(response).await
    }

    /// `POST /{segments..}` with an optional JSON body and decode the JSON reply.
    pub async fn post_json<T, B>(&self, segments: &[&str], body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.url(segments)?;
        let mut request = self.client.post(url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = self.send(request, "POST", &url).await?;
        Self::parse_response(response).await
    }

    /// `GET /{segments..}` without decoding, reporting status and latency.
    ///
    /// Non-2xx statuses are returned, not converted into errors; only a
    /// transport failure is an error here.
    pub async fn ping(&self, segments: &[&str]) -> Result<PingResponse, ApiError> {
        let url = self.url(segments)?;
        let start = Instant::now();
        let response = self.send(self.client.get(url.clone()), "GET", &url).await?;
        Ok(PingResponse {
            status: response.status().as_u16(),
            latency: start.elapsed(),
        })
    }

    // ---- private helpers ----

    /// Append `segments` to the base URL, percent-encoding each one
    /// (`/` becomes `%2F`).
    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(format!("{} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        method: &'static str,
        url: &Url,
    ) -> Result<reqwest::Response, ApiError> {
        let path = url.path();
        let request_id = uuid::Uuid::new_v4().to_string();
        let request = match HeaderValue::from_str(&request_id) {
            Ok(value) => request.header(REQUEST_ID_HEADER, value),
            Err(_) => request,
        };

        tracing::debug!(method, path, request_id = %request_id, "Sending backend request");

        let response = request
            .header(ACCEPT, "application/json")
            .send()
            .await
            .inspect_err(|e| {
                tracing::debug!(method, path, request_id = %request_id, error = %e, "Backend request failed");
            })?;

        tracing::debug!(
            method,
            path,
            request_id = %request_id,
            status = response.status().as_u16(),
            "Backend responded",
        );
        Ok(response)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::Http`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}
