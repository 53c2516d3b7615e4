//! Batch job and task entities as reported by the backend, plus the
//! request payload used to create a batch.
//!
//! Jobs are owned by the backend; the client only holds read-only copies.
//! Decoding validates every job, so a [`BatchJob`] value is always
//! complete and internally consistent.

use chrono::{DateTime, NaiveDateTime, Utc};
use promptr_core::error::CoreError;
use promptr_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Allowed drift between the reported percentage and `completed/total*100`.
///
/// Backends round the percentage for display.
pub const PERCENTAGE_TOLERANCE: f64 = 0.5;

// ---------------------------------------------------------------------------
// BatchStatus
// ---------------------------------------------------------------------------

/// Server-authoritative job status.
///
/// `Pending -> Running -> {Completed | Failed | Stopped}`; the last three
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    #[serde(alias = "processing")]
    Running,
    Completed,
    Failed,
    Stopped,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Stopped => "stopped",
        }
    }

    /// No further transition is expected once a job is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Stopped
        )
    }

    /// Whether an observer polling the job may legitimately see `next`
    /// after having seen `self`.
    ///
    /// Polling can skip intermediate states (`Pending -> Completed`), but
    /// can never move backwards or leave a terminal state.
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            BatchStatus::Pending => true,
            BatchStatus::Running => next.is_terminal(),
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Stopped => false,
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: u32,
    pub total: u32,
    /// `completed / total * 100`, or 0 when `total` is 0.
    pub percentage: f64,
    /// Number of failed tasks, when the backend reports it.
    #[serde(default)]
    pub failed: u32,
}

impl Progress {
    /// Progress with the percentage derived from the counts.
    pub fn new(completed: u32, total: u32) -> Self {
        Self {
            completed,
            total,
            percentage: expected_percentage(completed, total),
            failed: 0,
        }
    }

    /// Derive progress from task statuses when the backend omits it.
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let completed = tasks.iter().filter(|t| t.status == "completed").count() as u32;
        let failed = tasks.iter().filter(|t| t.status == "failed").count() as u32;
        Self {
            failed,
            ..Self::new(completed, tasks.len() as u32)
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.completed > self.total {
            return Err(CoreError::Validation(format!(
                "progress reports {} completed out of {} total",
                self.completed, self.total
            )));
        }
        if self.failed > self.total {
            return Err(CoreError::Validation(format!(
                "progress reports {} failed out of {} total",
                self.failed, self.total
            )));
        }
        if !(0.0..=100.0).contains(&self.percentage) {
            return Err(CoreError::Validation(format!(
                "progress percentage {} outside [0, 100]",
                self.percentage
            )));
        }
        let expected = expected_percentage(self.completed, self.total);
        if (self.percentage - expected).abs() > PERCENTAGE_TOLERANCE {
            return Err(CoreError::Validation(format!(
                "progress percentage {} does not match {}/{}",
                self.percentage, self.completed, self.total
            )));
        }
        Ok(())
    }
}

fn expected_percentage(completed: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64 * 100.0
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A single prompt inside a batch.
///
/// Once a task leaves its pending state the backend sets exactly one of
/// `result` / `error`; the client does not rely on more than that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(alias = "task_id")]
    pub id: String,
    pub prompt: String,
    /// Backend-defined status string.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

// ---------------------------------------------------------------------------
// BatchJob
// ---------------------------------------------------------------------------

/// Read-only copy of a backend batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BatchJobWire")]
pub struct BatchJob {
    /// Opaque, server-assigned identifier.
    pub job_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: BatchStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub progress: Progress,
    pub tasks: Vec<Task>,
}

impl BatchJob {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Wire shape accepted from the backend before validation.
#[derive(Deserialize)]
struct BatchJobWire {
    #[serde(alias = "id")]
    job_id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    status: BatchStatus,
    created_at: String,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    completed_at: Option<String>,
    #[serde(default)]
    progress: Option<Progress>,
    #[serde(default)]
    tasks: Vec<Task>,
}

impl TryFrom<BatchJobWire> for BatchJob {
    type Error = CoreError;

    fn try_from(wire: BatchJobWire) -> Result<Self, Self::Error> {
        if wire.job_id.trim().is_empty() {
            return Err(CoreError::Validation("job_id is empty".to_string()));
        }

        let created_at = parse_timestamp(&wire.created_at)?;
        let updated_at = match wire.updated_at.as_deref() {
            Some(raw) => parse_timestamp(raw)?,
            None => created_at,
        };
        let completed_at = wire.completed_at.as_deref().map(parse_timestamp).transpose()?;

        let progress = wire
            .progress
            .unwrap_or_else(|| Progress::from_tasks(&wire.tasks));
        progress.validate()?;

        Ok(Self {
            job_id: wire.job_id,
            name: wire.name,
            description: wire.description.filter(|d| !d.is_empty()),
            status: wire.status,
            created_at,
            updated_at,
            completed_at,
            progress,
            tasks: wire.tasks,
        })
    }
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> Result<Timestamp, CoreError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| CoreError::Validation(format!("invalid timestamp '{raw}'")))
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Acknowledgement returned by some backends instead of a full job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobAck {
    pub job_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of a create/run/stop/status response.
#[derive(Debug)]
pub(crate) enum JobPayload {
    /// A complete job, bare or wrapped as `{job, progress}`.
    Job(BatchJob),
    /// Only an acknowledgement; the job must be fetched separately.
    Ack(JobAck),
}

impl JobPayload {
    pub(crate) fn from_value(value: Value) -> Result<Self, CoreError> {
        let Value::Object(mut map) = value else {
            return Err(CoreError::Validation(
                "expected a JSON object describing a batch job".to_string(),
            ));
        };

        if let Some(mut job) = map.remove("job") {
            if let (Some(progress), Value::Object(fields)) = (map.remove("progress"), &mut job) {
                fields.insert("progress".to_string(), progress);
            }
            return decode_job(job).map(JobPayload::Job);
        }

        if map.contains_key("name") && map.contains_key("created_at") {
            return decode_job(Value::Object(map)).map(JobPayload::Job);
        }

        if map.contains_key("job_id") {
            return serde_json::from_value(Value::Object(map))
                .map(JobPayload::Ack)
                .map_err(|e| CoreError::Validation(e.to_string()));
        }

        Err(CoreError::Validation(
            "response carries neither a batch job nor a job id".to_string(),
        ))
    }
}

/// Decode a list response: a bare array, or `{active_jobs, job_history}`.
pub(crate) fn decode_job_list(value: Value) -> Result<Vec<BatchJob>, CoreError> {
    match value {
        Value::Array(items) => items.into_iter().map(decode_job).collect(),
        Value::Object(mut map) => {
            let mut jobs = Vec::new();
            let mut recognised = false;
            for key in ["active_jobs", "job_history", "jobs", "batches"] {
                match map.remove(key) {
                    Some(Value::Array(items)) => {
                        recognised = true;
                        for item in items {
                            jobs.push(decode_job(item)?);
                        }
                    }
                    Some(Value::Null) | None => {}
                    Some(_) => {
                        return Err(CoreError::Validation(format!("'{key}' is not an array")));
                    }
                }
            }
            if recognised {
                Ok(jobs)
            } else {
                Err(CoreError::Validation(
                    "list response contains no job collection".to_string(),
                ))
            }
        }
        _ => Err(CoreError::Validation(
            "expected a JSON array or object of batch jobs".to_string(),
        )),
    }
}

fn decode_job(value: Value) -> Result<BatchJob, CoreError> {
    serde_json::from_value(value).map_err(|e| CoreError::Validation(e.to_string()))
}

// ---------------------------------------------------------------------------
// NewBatch
// ---------------------------------------------------------------------------

/// Request body for `POST /api/batches`.
#[derive(Debug, Clone, Serialize)]
pub struct NewBatch {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub prompts: Vec<PromptSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptSpec {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl NewBatch {
    /// Build a request where every prompt targets the same platform.
    pub fn new<I, S>(name: &str, prompts: I, description: Option<&str>, target: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            description: description.map(str::to_string),
            prompts: prompts
                .into_iter()
                .map(|text| PromptSpec {
                    text: text.into(),
                    platform: target.map(str::to_string),
                })
                .collect(),
        }
    }

    /// Rules:
    /// - The name must not be blank.
    /// - At least one prompt is required.
    /// - No prompt text may be blank.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("batch name is required".to_string()));
        }
        if self.prompts.is_empty() {
            return Err(CoreError::Validation(
                "at least one prompt is required".to_string(),
            ));
        }
        if let Some(index) = self.prompts.iter().position(|p| p.text.trim().is_empty()) {
            return Err(CoreError::Validation(format!("prompt {index} is blank")));
        }
        Ok(())
    }
}
