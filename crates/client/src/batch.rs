//! Batch job client.
//!
//! [`BatchClient`] wraps the five remote batch operations.  Each call is
//! individually wrapped by the retry executor with its own options:
//! reads repeat on any retryable failure, while state-changing calls
//! (create / run / stop) only repeat when the request provably never
//! reached the backend.  Every job returned has been validated and
//! checked against the last status observed for that job id.

use std::future::Future;

use promptr_core::retry::{self, RetryError, RetryOptions, Retryable};
use serde_json::Value;

use crate::api::{ApiError, ApiTransport};
use crate::config::{ClientConfig, RetryPolicy};
use crate::models::{decode_job_list, BatchJob, JobPayload, NewBatch};
use crate::tracker::{StatusTracker, TransitionAnomaly};

/// The remote operations exposed by [`BatchClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateBatch,
    RunBatch,
    GetBatchStatus,
    StopBatch,
    ListBatches,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::CreateBatch => "create_batch",
            Operation::RunBatch => "run_batch",
            Operation::GetBatchStatus => "get_batch_status",
            Operation::StopBatch => "stop_batch",
            Operation::ListBatches => "list_batches",
        }
    }

    /// Whether the operation changes backend state.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Operation::CreateBatch | Operation::RunBatch | Operation::StopBatch
        )
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a batch operation.
///
/// Every variant identifies the operation and, where one applies, the
/// job id.
#[derive(Debug, thiserror::Error)]
pub enum BatchClientError {
    /// Rejected locally before any network call.
    #[error("{operation}: invalid request: {reason}")]
    InvalidRequest {
        operation: Operation,
        job_id: Option<String>,
        reason: String,
    },

    /// The remote call failed after the retry budget (or on a
    /// non-retryable error).
    #[error("{operation} failed for job {}: {source}", .job_id.as_deref().unwrap_or("-"))]
    Failed {
        operation: Operation,
        job_id: Option<String>,
        #[source]
        source: RetryError<ApiError>,
    },

    /// The backend reported a status transition the state machine forbids.
    #[error("{operation}: protocol anomaly: {anomaly}")]
    ProtocolAnomaly {
        operation: Operation,
        #[source]
        anomaly: TransitionAnomaly,
    },
}

impl BatchClientError {
    pub fn operation(&self) -> Operation {
        match self {
            BatchClientError::InvalidRequest { operation, .. }
            | BatchClientError::Failed { operation, .. }
            | BatchClientError::ProtocolAnomaly { operation, .. } => *operation,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            BatchClientError::InvalidRequest { job_id, .. }
            | BatchClientError::Failed { job_id, .. } => job_id.as_deref(),
            BatchClientError::ProtocolAnomaly { anomaly, .. } => Some(&anomaly.job_id),
        }
    }

    /// The last transport error, when the failure came from the backend.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            BatchClientError::Failed { source, .. } => Some(source.last_error()),
            _ => None,
        }
    }
}

/// Client for the remote batch API.
///
/// Holds no job data of its own beyond the last observed status per job
/// (see [`StatusTracker`]); every operation goes to the backend.
pub struct BatchClient {
    api: ApiTransport,
    policy: RetryPolicy,
    tracker: StatusTracker,
}

impl BatchClient {
    /// Build a client from configuration.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let api = ApiTransport::new(config.base_url.clone(), config.request_timeout)?;
        Ok(Self::with_transport(api, config.retry.clone()))
    }

    /// Build a client over an existing transport.
    pub fn with_transport(api: ApiTransport, policy: RetryPolicy) -> Self {
        Self {
            api,
            policy,
            tracker: StatusTracker::new(),
        }
    }

    pub fn transport(&self) -> &ApiTransport {
        &self.api
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    /// Create a batch of prompts, all targeting the same platform.
    ///
    /// Sends `POST /api/batches`.  The new job is returned in `Pending`
    /// status.
    pub async fn create_batch<S: AsRef<str>>(
        &self,
        name: &str,
        prompts: &[S],
        description: Option<&str>,
        target: Option<&str>,
    ) -> Result<BatchJob, BatchClientError> {
        let operation = Operation::CreateBatch;
        let request = NewBatch::new(
            name,
            prompts.iter().map(|p| p.as_ref().to_string()),
            description,
            target,
        );
        request
            .validate()
            .map_err(|e| BatchClientError::InvalidRequest {
                operation,
                job_id: None,
                reason: e.to_string(),
            })?;

        let (api, request) = (&self.api, &request);
        let payload = self
            .call(operation, None, move |_| async move {
                let value: Value = api.post_json(&["api", "batches"], Some(request)).await?;
                decode_payload(value)
            })
            .await?;

        let job = match payload {
            JobPayload::Job(job) => job,
            JobPayload::Ack(ack) => {
                tracing::debug!(job_id = %ack.job_id, "Create acknowledged, fetching job");
                return self.get_batch_status(&ack.job_id).await;
            }
        };

        tracing::info!(job_id = %job.job_id, tasks = job.tasks.len(), "Batch created");
        self.observe(operation, job)
    }

    /// Start a pending batch (`POST /api/batches/{job_id}/run`).
    ///
    /// Running an already-running batch is a backend no-op.
    pub async fn run_batch(&self, job_id: &str) -> Result<BatchJob, BatchClientError> {
        self.transition(Operation::RunBatch, job_id, "run").await
    }

    /// Fetch a read-only snapshot (`GET /api/batches/{job_id}/status`).
    pub async fn get_batch_status(&self, job_id: &str) -> Result<BatchJob, BatchClientError> {
        let operation = Operation::GetBatchStatus;
        validate_job_id(operation, job_id)?;

        let api = &self.api;
        let job = self
            .call(operation, Some(job_id), move |_| async move {
                let value: Value = api.get_json(&["api", "batches", job_id, "status"]).await?;
                match decode_payload(value)? {
                    JobPayload::Job(job) => Ok(job),
                    JobPayload::Ack(_) => Err(ApiError::InvalidResponse(
                        "status response does not contain a batch job".to_string(),
                    )),
                }
            })
            .await?;

        if job.job_id != job_id {
            return Err(BatchClientError::Failed {
                operation,
                job_id: Some(job_id.to_string()),
                source: RetryError::Aborted {
                    attempt: 1,
                    error: ApiError::InvalidResponse(format!(
                        "asked for job {job_id}, backend returned {}",
                        job.job_id
                    )),
                },
            });
        }

        self.observe(operation, job)
    }

    /// Stop a running batch (`POST /api/batches/{job_id}/stop`).
    ///
    /// Stopping a terminal batch is a backend no-op.
    pub async fn stop_batch(&self, job_id: &str) -> Result<BatchJob, BatchClientError> {
        self.transition(Operation::StopBatch, job_id, "stop").await
    }

    /// List every batch known to the backend (`GET /api/batches`).
    pub async fn list_batches(&self) -> Result<Vec<BatchJob>, BatchClientError> {
        let operation = Operation::ListBatches;
        let api = &self.api;
        let jobs = self
            .call(operation, None, move |_| async move {
                let value: Value = api.get_json(&["api", "batches"]).await?;
                decode_job_list(value).map_err(|e| ApiError::InvalidResponse(e.to_string()))
            })
            .await?;

        for job in &jobs {
            self.tracker
                .observe(job)
                .map_err(|anomaly| BatchClientError::ProtocolAnomaly { operation, anomaly })?;
        }
        Ok(jobs)
    }

    // ---- private helpers ----

    /// Shared body of `run` and `stop`.
    async fn transition(
        &self,
        operation: Operation,
        job_id: &str,
        action: &str,
    ) -> Result<BatchJob, BatchClientError> {
        validate_job_id(operation, job_id)?;

        let api = &self.api;
        let payload = self
            .call(operation, Some(job_id), move |_| async move {
                let value: Value = api
                    .post_json::<_, ()>(&["api", "batches", job_id, action], None)
                    .await?;
                decode_payload(value)
            })
            .await?;

        match payload {
            JobPayload::Job(job) => {
                tracing::info!(job_id, status = %job.status, %operation, "Batch transition applied");
                self.observe(operation, job)
            }
            JobPayload::Ack(ack) => {
                tracing::info!(
                    job_id,
                    %operation,
                    message = ack.message.as_deref().unwrap_or(""),
                    "Batch transition acknowledged, fetching job",
                );
                self.get_batch_status(job_id).await
            }
        }
    }

    /// Run one remote call under the retry budget for `operation`.
    async fn call<T, F, Fut>(
        &self,
        operation: Operation,
        job_id: Option<&str>,
        attempt: F,
    ) -> Result<T, BatchClientError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let options = self.options_for(operation, job_id);
        let result = if operation.is_mutating() {
            retry::execute_with(&options, attempt, |e: &ApiError| {
                e.is_retryable() && e.is_undelivered()
            })
            .await
        } else {
            retry::execute(&options, attempt).await
        };

        result.map_err(|source| BatchClientError::Failed {
            operation,
            job_id: job_id.map(str::to_string),
            source,
        })
    }

    fn options_for(&self, operation: Operation, job_id: Option<&str>) -> RetryOptions {
        let base = if operation.is_mutating() {
            &self.policy.write
        } else {
            &self.policy.read
        };
        let options = base.clone().with_context("operation", operation.as_str());
        match job_id {
            Some(id) => options.with_context("job_id", id),
            None => options,
        }
    }

    fn observe(&self, operation: Operation, job: BatchJob) -> Result<BatchJob, BatchClientError> {
        self.tracker
            .observe(&job)
            .map_err(|anomaly| BatchClientError::ProtocolAnomaly { operation, anomaly })?;
        Ok(job)
    }
}

fn decode_payload(value: Value) -> Result<JobPayload, ApiError> {
    JobPayload::from_value(value).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

/// Job ids are opaque and sent percent-encoded as one path segment.
///
/// Only ids that cannot name a segment at all are refused: the empty id
/// and the dot segments, which URL normalisation would swallow.
fn validate_job_id(operation: Operation, job_id: &str) -> Result<(), BatchClientError> {
    if matches!(job_id, "" | "." | "..") {
        return Err(BatchClientError::InvalidRequest {
            operation,
            job_id: Some(job_id.to_string()),
            reason: format!("{job_id:?} is not a usable job id"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn mutating_operations_are_classified() {
        assert!(Operation::CreateBatch.is_mutating());
        assert!(Operation::RunBatch.is_mutating());
        assert!(Operation::StopBatch.is_mutating());
        assert!(!Operation::GetBatchStatus.is_mutating());
        assert!(!Operation::ListBatches.is_mutating());
    }

    #[test]
    fn opaque_job_ids_are_accepted() {
        for id in ["job-123_a.b", "batch~42=", "a/b", "a b?c#d", "x@y+z%"] {
            assert!(validate_job_id(Operation::RunBatch, id).is_ok(), "{id}");
        }
    }

    #[test]
    fn unusable_job_ids_are_rejected() {
        for bad in ["", ".", ".."] {
            assert_matches!(
                validate_job_id(Operation::RunBatch, bad),
                Err(BatchClientError::InvalidRequest { operation: Operation::RunBatch, .. })
            );
        }
    }

    #[test]
    fn failed_error_names_operation_and_job() {
        let err = BatchClientError::Failed {
            operation: Operation::StopBatch,
            job_id: Some("job-7".to_string()),
            source: RetryError::Exhausted {
                attempts: 2,
                last: ApiError::Http {
                    status: 502,
                    body: "bad gateway".to_string(),
                },
            },
        };
        let message = err.to_string();
        assert!(message.contains("stop_batch"), "{message}");
        assert!(message.contains("job-7"), "{message}");
        assert!(message.contains("after 2 attempts"), "{message}");
        assert_eq!(err.job_id(), Some("job-7"));
        assert_eq!(err.api_error().and_then(ApiError::status), Some(502));
    }

    #[test]
    fn write_options_carry_diagnostic_context() {
        let client = BatchClient::with_transport(
            ApiTransport::with_client(reqwest::Client::new(), "http://localhost:5000"),
            RetryPolicy::default(),
        );
        let options = client.options_for(Operation::RunBatch, Some("job-1"));
        assert_eq!(options.max_attempts, 2);
        assert_eq!(options.context.get("operation").map(String::as_str), Some("run_batch"));
        assert_eq!(options.context.get("job_id").map(String::as_str), Some("job-1"));
    }
}
