//! Last-observed status per job, used to detect protocol anomalies.
//!
//! The backend is authoritative for job status; the client only checks
//! that what it observes is monotonic.  A regression such as
//! `Completed -> Running` is surfaced as a [`TransitionAnomaly`] and the
//! previously observed status is kept.
//!
//! Observations are ordered by the job's `updated_at`.  A snapshot older
//! than the one already recorded (two polls whose responses crossed) is
//! stale: it is neither recorded nor reported.  The tracker holds at most
//! `capacity` jobs; finished jobs are evicted first, oldest first.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use promptr_core::types::Timestamp;

use crate::models::{BatchJob, BatchStatus};

/// Default number of jobs remembered.
pub const DEFAULT_TRACKER_CAPACITY: usize = 1024;

/// A status change the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job {job_id} moved from {from} to {to}")]
pub struct TransitionAnomaly {
    pub job_id: String,
    pub from: BatchStatus,
    pub to: BatchStatus,
}

#[derive(Debug, Clone, Copy)]
struct Seen {
    status: BatchStatus,
    updated_at: Timestamp,
}

#[derive(Debug)]
pub struct StatusTracker {
    last_seen: Mutex<HashMap<String, Seen>>,
    capacity: usize,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TRACKER_CAPACITY)
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            last_seen: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Record the status carried by `job`.
    ///
    /// Returns the previously observed status, or an anomaly if the
    /// transition is not allowed.
    pub fn observe(&self, job: &BatchJob) -> Result<Option<BatchStatus>, TransitionAnomaly> {
        let mut seen = self.lock();
        let previous = seen.get(&job.job_id).copied();

        if let Some(from) = previous {
            if job.updated_at < from.updated_at {
                tracing::debug!(
                    job_id = %job.job_id,
                    recorded = %from.status,
                    stale = %job.status,
                    "Ignoring stale batch snapshot",
                );
                return Ok(Some(from.status));
            }
            if !from.status.can_transition_to(job.status) {
                tracing::warn!(
                    job_id = %job.job_id,
                    from = %from.status,
                    to = %job.status,
                    "Unexpected batch status transition",
                );
                return Err(TransitionAnomaly {
                    job_id: job.job_id.clone(),
                    from: from.status,
                    to: job.status,
                });
            }
            if from.status != job.status {
                tracing::info!(
                    job_id = %job.job_id,
                    from = %from.status,
                    to = %job.status,
                    "Batch status changed",
                );
            }
        } else if seen.len() >= self.capacity {
            evict_one(&mut seen);
        }

        seen.insert(
            job.job_id.clone(),
            Seen {
                status: job.status,
                updated_at: job.updated_at,
            },
        );
        Ok(previous.map(|p| p.status))
    }

    pub fn last_seen(&self, job_id: &str) -> Option<BatchStatus> {
        self.lock().get(job_id).map(|s| s.status)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop the record for `job_id`, e.g. after a job was deleted upstream.
    pub fn forget(&self, job_id: &str) {
        self.lock().remove(job_id);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Seen>> {
        self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Evict the oldest finished job, or the oldest job if none has finished.
fn evict_one(seen: &mut HashMap<String, Seen>) {
    let victim = seen
        .iter()
        .min_by_key(|(_, s)| (!s.status.is_terminal(), s.updated_at))
        .map(|(id, _)| id.clone());
    if let Some(id) = victim {
        tracing::debug!(job_id = %id, "Status tracker full, evicting job");
        seen.remove(&id);
    }
}
