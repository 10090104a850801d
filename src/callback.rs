//! Completion callbacks.
//!
//! When a job with a `callback_url` reaches a terminal state, the service
//! POSTs a [`CallbackPayload`] to that URL once. Delivery is best-effort:
//! failures are logged and never retried, and they never change the job.

use crate::error::JobError;
use crate::job::{Job, JobStatus, ResultArtifact};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// JSON body sent to a callback URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_units: Option<usize>,
    pub artifacts: Vec<ResultArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CallbackPayload {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            total_units: job.total_units,
            artifacts: job.artifacts.clone(),
            error_message: job.error_message.clone(),
        }
    }
}

/// Delivers callback payloads.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, url: &str, payload: &CallbackPayload) -> Result<(), JobError>;
}

/// POSTs payloads as JSON with a bounded timeout.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(timeout: Duration) -> Result<Self, JobError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("docjobs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| JobError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, url: &str, payload: &CallbackPayload) -> Result<(), JobError> {
        let failed = |detail: String| JobError::CallbackFailed {
            url: url.to_string(),
            detail,
        };
        self.client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?
            .error_for_status()
            .map_err(|e| failed(e.to_string()))?;
        Ok(())
    }
}

/// Fire the job's callback, if any. Never fails.
pub(crate) async fn notify_terminal(notifier: &dyn Notifier, job: &Job) {
    let Some(url) = job.request.callback_url.as_deref() else {
        return;
    };
    let payload = CallbackPayload::from_job(job);
    match notifier.notify(url, &payload).await {
        Ok(()) => debug!(job_id = %job.job_id, url, "Callback delivered"),
        Err(error) => warn!(job_id = %job.job_id, url, error = %error, "Callback failed"),
    }
}
