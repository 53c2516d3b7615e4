//! Poll a batch until it reaches a terminal status.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::batch::{BatchClient, BatchClientError};
use crate::models::BatchJob;

/// Poll `job_id` every `interval`, calling `on_update` with each snapshot.
///
/// Returns the terminal job, or `None` if `cancel` fires first.  Each poll
/// goes through [`BatchClient::get_batch_status`], so it carries the read
/// retry budget; a poll that still fails ends the watch with that error.
pub async fn watch_batch<F>(
    client: &BatchClient,
    job_id: &str,
    interval: Duration,
    cancel: &CancellationToken,
    mut on_update: F,
) -> Result<Option<BatchJob>, BatchClientError>
where
    F: FnMut(&BatchJob),
{
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(job_id, "Batch watch cancelled");
                return Ok(None);
            }
            result = client.get_batch_status(job_id) => result?,
        };

        on_update(&job);
        if job.is_terminal() {
            tracing::info!(job_id, status = %job.status, "Batch finished");
            return Ok(Some(job));
        }

        // Wait before the next poll, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
