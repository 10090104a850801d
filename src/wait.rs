//! Client-side waiting for a job to finish.
//!
//! Polling is purely client-side: giving up on a wait never cancels or
//! otherwise affects the job.

use crate::error::{JobError, WaitError};
use crate::job::{Job, JobStatus};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Anything that can report a job's current record.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn job_status(&self, job_id: &str) -> Result<Job, JobError>;
}

/// Polling cadence and deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Delay between polls. Default: 5 s.
    pub interval: Duration,
    /// Give up after this long. Default: 900 s.
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(900),
        }
    }
}

impl WaitOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Poll until the job is terminal or the timeout elapses.
///
/// - `completed` → `Ok(job)`
/// - `failed` → [`WaitError::JobFailed`]
/// - deadline passed → [`WaitError::Timeout`]
/// - lookup failed → [`WaitError::Status`]
pub async fn wait_for_job(
    source: &dyn StatusSource,
    job_id: &str,
    options: WaitOptions,
) -> Result<Job, WaitError> {
    wait_for_job_with(source, job_id, options, |_| {}).await
}

/// Like [`wait_for_job`], calling `observer` with every polled record.
pub async fn wait_for_job_with<F>(
    source: &dyn StatusSource,
    job_id: &str,
    options: WaitOptions,
    mut observer: F,
) -> Result<Job, WaitError>
where
    F: FnMut(&Job) + Send,
{
    let start = Instant::now();
    loop {
        let job = source.job_status(job_id).await?;
        observer(&job);
        debug!(job_id, status = %job.status, progress = job.progress, "Polled job");

        match job.status {
            JobStatus::Completed => return Ok(job),
            JobStatus::Failed => {
                return Err(WaitError::JobFailed {
                    job_id: job_id.to_string(),
                    message: job
                        .error_message
                        .unwrap_or_else(|| "unknown error".to_string()),
                })
            }
            JobStatus::Submitted | JobStatus::Processing => {}
        }

        let elapsed = start.elapsed();
        if elapsed >= options.timeout {
            return Err(WaitError::Timeout {
                job_id: job_id.to_string(),
                waited_ms: elapsed.as_millis() as u64,
                last_status: job.status,
            });
        }
        tokio::time::sleep(options.interval.min(options.timeout - elapsed)).await;
    }
}
