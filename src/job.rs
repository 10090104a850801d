//! The job record and its lifecycle rules.
//!
//! Every store applies mutations through [`Job::apply`], so the lifecycle
//! invariants hold regardless of the backing storage:
//!
//! - terminal states (`completed`, `failed`) are absorbing;
//! - `progress` never decreases and is 100 on `completed`;
//! - `artifacts` is non-empty exactly when the job is `completed`;
//! - `error_message` is present exactly when the job is `failed`;
//! - `updated_at` strictly advances on every mutation.

use crate::config::{ConversionKind, RenderParams, ServiceConfig, MAX_DPI, MIN_DPI};
use crate::error::JobError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `completed` or `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Submitted, Submitted)
                | (Submitted, Processing)
                | (Submitted, Failed)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "submitted" => Ok(JobStatus::Submitted),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(JobError::validation(
                "status",
                format!("'{other}' is not one of submitted, processing, completed, failed"),
            )),
        }
    }
}

// ── Requests ─────────────────────────────────────────────────────────────

/// A client's conversion request, before defaults are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Key of the source document inside the namespace. Required.
    pub source_key: String,
    /// Namespace (bucket) holding the source and receiving the outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Prefix for uploaded outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_prefix: Option<String>,
    #[serde(default)]
    pub kind: ConversionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpi: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimize: Option<bool>,
    #[serde(default)]
    pub generate_pdf: bool,
    /// Keep outputs inline (base64) in the job record instead of uploading.
    #[serde(default)]
    pub return_inline: bool,
    /// Where to POST a notification once the job is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl SubmitRequest {
    pub fn new(source_key: impl Into<String>) -> Self {
        Self {
            source_key: source_key.into(),
            ..Default::default()
        }
    }

    /// Validate the request and freeze it with service defaults applied.
    pub fn resolve(&self, config: &ServiceConfig) -> Result<JobRequest, JobError> {
        let source_key = self.source_key.trim();
        if source_key.is_empty() {
            return Err(JobError::validation("source_key", "is required"));
        }
        if !crate::artifact::is_valid_key(source_key) {
            return Err(JobError::validation(
                "source_key",
                format!("'{source_key}' is not a valid relative key"),
            ));
        }

        let namespace = self
            .namespace
            .clone()
            .filter(|ns| !ns.trim().is_empty())
            .or_else(|| config.default_namespace.clone())
            .ok_or_else(|| {
                JobError::validation("namespace", "is required (either in request or config)")
            })?;
        if !crate::artifact::is_valid_namespace(&namespace) {
            return Err(JobError::validation(
                "namespace",
                format!("'{namespace}' is not a valid namespace name"),
            ));
        }

        let output_prefix = self
            .output_prefix
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .unwrap_or(config.default_output_prefix.as_str())
            .trim_matches('/')
            .to_string();
        if !crate::artifact::is_valid_key(&output_prefix) {
            return Err(JobError::validation(
                "output_prefix",
                format!("'{output_prefix}' is not a valid relative prefix"),
            ));
        }

        let dpi = self.dpi.unwrap_or(config.default_dpi);
        if !(MIN_DPI..=MAX_DPI).contains(&dpi) {
            return Err(JobError::validation(
                "dpi",
                format!("must be {MIN_DPI}–{MAX_DPI}, got {dpi}"),
            ));
        }

        let callback_url = match self.callback_url.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let url = reqwest::Url::parse(raw).map_err(|e| {
                    JobError::validation("callback_url", format!("'{raw}' is not a URL: {e}"))
                })?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(JobError::validation(
                        "callback_url",
                        format!("scheme must be http or https, got '{}'", url.scheme()),
                    ));
                }
                Some(url.to_string())
            }
        };

        Ok(JobRequest {
            kind: self.kind,
            source_key: source_key.to_string(),
            namespace,
            output_prefix,
            params: RenderParams {
                dpi,
                optimize: self.optimize.unwrap_or(true),
                max_rendered_pixels: config.max_rendered_pixels,
                generate_pdf: self.generate_pdf,
            },
            return_inline: self.return_inline,
            callback_url,
        })
    }
}

/// Immutable snapshot of a validated submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub kind: ConversionKind,
    pub source_key: String,
    pub namespace: String,
    pub output_prefix: String,
    pub params: RenderParams,
    pub return_inline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl JobRequest {
    /// File stem of the source key: `docs/report.final.pdf` → `report.final`.
    pub fn source_stem(&self) -> &str {
        let name = self
            .source_key
            .rsplit('/')
            .next()
            .unwrap_or(&self.source_key);
        match name.rfind('.') {
            Some(0) | None => name,
            Some(dot) => &name[..dot],
        }
    }
}

/// Returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub job_id: String,
    pub status: JobStatus,
}

// ── Artifacts ────────────────────────────────────────────────────────────

/// Where a produced unit lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactLocation {
    /// Uploaded to the artifact store under this key.
    Stored { key: String },
    /// Kept in the record as base64.
    Inline { base64: String },
}

/// Descriptor of one produced output unit (e.g. one rendered page).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultArtifact {
    /// 1-based unit index.
    pub unit: usize,
    #[serde(flatten)]
    pub location: ArtifactLocation,
    pub content_type: String,
    pub size_bytes: u64,
}

impl ResultArtifact {
    pub fn key(&self) -> Option<&str> {
        match &self.location {
            ArtifactLocation::Stored { key } => Some(key),
            ArtifactLocation::Inline { .. } => None,
        }
    }
}

// ── Job record ───────────────────────────────────────────────────────────

/// The durable record of one asynchronous conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub progress: u8,
    pub request: JobRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_units: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ResultArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Job {
    /// A fresh `submitted` record with a generated id.
    pub fn new(request: JobRequest, retention: std::time::Duration, now: DateTime<Utc>) -> Self {
        let retention = ChronoDuration::from_std(retention).unwrap_or(ChronoDuration::MAX);
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Submitted,
            created_at: now,
            updated_at: now,
            progress: 0,
            request,
            total_units: None,
            artifacts: Vec::new(),
            error_message: None,
            expires_at: now.checked_add_signed(retention).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Apply a partial update, enforcing the lifecycle invariants.
    ///
    /// On error the record is left untouched.
    pub fn apply(&mut self, update: JobUpdate, now: DateTime<Utc>) -> Result<(), JobError> {
        if self.status.is_terminal() {
            return Err(JobError::StaleState {
                job_id: self.job_id.clone(),
                status: self.status,
            });
        }

        let next_status = update.status.unwrap_or(self.status);
        if !self.status.can_transition_to(next_status) {
            return Err(JobError::InvalidTransition {
                job_id: self.job_id.clone(),
                from: self.status,
                to: next_status,
            });
        }

        let mut next = self.clone();
        next.status = next_status;

        if let Some(p) = update.progress {
            next.progress = next.progress.max(p.min(100));
        }
        if let Some(total) = update.total_units {
            next.total_units = Some(total);
        }

        match next_status {
            JobStatus::Completed => {
                let artifacts = update.artifacts.unwrap_or_default();
                if artifacts.is_empty() {
                    return Err(JobError::Internal(format!(
                        "job '{}' cannot complete without artifacts",
                        self.job_id
                    )));
                }
                next.artifacts = artifacts;
                next.progress = 100;
                next.error_message = None;
            }
            JobStatus::Failed => {
                let message = update
                    .error_message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "unknown error".to_string());
                next.error_message = Some(message);
                next.artifacts.clear();
            }
            JobStatus::Submitted | JobStatus::Processing => {
                if update.artifacts.is_some() || update.error_message.is_some() {
                    return Err(JobError::Internal(format!(
                        "job '{}': artifacts and errors are only written with a terminal status",
                        self.job_id
                    )));
                }
            }
        }

        next.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + ChronoDuration::microseconds(1)
        };

        *self = next;
        Ok(())
    }

    /// Compact projection for listings.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id.clone(),
            status: self.status,
            progress: self.progress,
            kind: self.request.kind,
            source_key: self.request.source_key.clone(),
            total_units: self.total_units,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// A partial update of a job record. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub total_units: Option<usize>,
    pub artifacts: Option<Vec<ResultArtifact>>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    /// Move to `processing` at the given checkpoint.
    pub fn processing(progress: u8) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            progress: Some(progress),
            ..Default::default()
        }
    }

    /// Advance progress only.
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_total_units(mut self, total: usize) -> Self {
        self.total_units = Some(total);
        self
    }

    pub fn completed(artifacts: Vec<ResultArtifact>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            artifacts: Some(artifacts),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Listing projection of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub kind: ConversionKind,
    pub source_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_units: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a listing: the jobs plus their count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobList {
    pub jobs: Vec<JobSummary>,
    pub count: usize,
}

/// Most-recent-first ordering used by every store (ties broken by id).
pub(crate) fn newest_first(a: &Job, b: &Job) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.job_id.cmp(&b.job_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> JobRequest {
        SubmitRequest::new("docs/report.pdf")
            .resolve(&ServiceConfig::builder().default_namespace("bucket").build().unwrap())
            .unwrap()
    }

    fn artifact(unit: usize) -> ResultArtifact {
        ResultArtifact {
            unit,
            location: ArtifactLocation::Stored {
                key: format!("converted/report_page_{unit}.png"),
            },
            content_type: "image/png".into(),
            size_bytes: 10,
        }
    }

    fn fresh() -> Job {
        Job::new(request(), Duration::from_secs(3600), Utc::now())
    }

    #[test]
    fn new_job_is_submitted_with_expiry() {
        let now = Utc::now();
        let job = Job::new(request(), Duration::from_secs(7 * 24 * 3600), now);
        assert_eq!(job.status, JobStatus::Submitted);
        assert_eq!(job.progress, 0);
        assert_eq!(job.expires_at - now, ChronoDuration::days(7));
        assert!(!job.is_expired(now));
    }

    #[test]
    fn progress_never_decreases() {
        let mut job = fresh();
        job.apply(JobUpdate::processing(40), Utc::now()).unwrap();
        job.apply(JobUpdate::progress(20), Utc::now()).unwrap();
        assert_eq!(job.progress, 40);
    }

    #[test]
    fn completion_sets_artifacts_and_full_progress() {
        let mut job = fresh();
        job.apply(JobUpdate::processing(10), Utc::now()).unwrap();
        job.apply(JobUpdate::completed(vec![artifact(1)]), Utc::now())
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.artifacts.len(), 1);
        assert!(job.error_message.is_none());
    }

    #[test]
    fn completion_without_artifacts_is_rejected() {
        let mut job = fresh();
        job.apply(JobUpdate::processing(10), Utc::now()).unwrap();
        assert!(job.apply(JobUpdate::completed(vec![]), Utc::now()).is_err());
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn failure_keeps_progress_and_sets_message() {
        let mut job = fresh();
        job.apply(JobUpdate::processing(10), Utc::now()).unwrap();
        job.apply(JobUpdate::failed("no source"), Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 10);
        assert_eq!(job.error_message.as_deref(), Some("no source"));
        assert!(job.artifacts.is_empty());
    }

    #[test]
    fn terminal_state_is_absorbing() {
        let mut job = fresh();
        job.apply(JobUpdate::failed("x"), Utc::now()).unwrap();
        let before = job.clone();
        let err = job.apply(JobUpdate::progress(50), Utc::now()).unwrap_err();
        assert!(matches!(err, JobError::StaleState { .. }));
        assert_eq!(job, before);
    }

    #[test]
    fn submitted_cannot_jump_to_completed() {
        let mut job = fresh();
        let err = job
            .apply(JobUpdate::completed(vec![artifact(1)]), Utc::now())
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
    }

    #[test]
    fn updated_at_advances_even_with_a_stuck_clock() {
        let mut job = fresh();
        let frozen = job.updated_at;
        job.apply(JobUpdate::processing(10), frozen).unwrap();
        assert!(job.updated_at > frozen);
        let second = job.updated_at;
        job.apply(JobUpdate::progress(20), frozen).unwrap();
        assert!(job.updated_at > second);
    }

    #[test]
    fn resolve_applies_defaults() {
        let config = ServiceConfig::builder()
            .default_namespace("bucket")
            .build()
            .unwrap();
        let req = SubmitRequest::new("a.pdf").resolve(&config).unwrap();
        assert_eq!(req.namespace, "bucket");
        assert_eq!(req.output_prefix, "converted");
        assert_eq!(req.params.dpi, 300);
        assert!(req.params.optimize);
        assert!(!req.return_inline);
    }

    #[test]
    fn resolve_rejects_missing_fields() {
        let config = ServiceConfig::default();
        let err = SubmitRequest::new("  ").resolve(&config).unwrap_err();
        assert!(matches!(err, JobError::Validation { field: "source_key", .. }));

        let err = SubmitRequest::new("a.pdf").resolve(&config).unwrap_err();
        assert!(matches!(err, JobError::Validation { field: "namespace", .. }));
    }

    #[test]
    fn resolve_rejects_bad_dpi_and_callback() {
        let config = ServiceConfig::builder()
            .default_namespace("bucket")
            .build()
            .unwrap();
        let mut req = SubmitRequest::new("a.pdf");
        req.dpi = Some(5000);
        assert!(matches!(
            req.resolve(&config),
            Err(JobError::Validation { field: "dpi", .. })
        ));

        let mut req = SubmitRequest::new("a.pdf");
        req.callback_url = Some("ftp://example.com/hook".into());
        assert!(matches!(
            req.resolve(&config),
            Err(JobError::Validation { field: "callback_url", .. })
        ));
    }

    #[test]
    fn source_stem_strips_dirs_and_extension() {
        let mut req = request();
        assert_eq!(req.source_stem(), "report");
        req.source_key = "a/b/archive.tar.gz".into();
        assert_eq!(req.source_stem(), "archive.tar");
        req.source_key = "noext".into();
        assert_eq!(req.source_stem(), "noext");
    }

    #[test]
    fn artifact_json_shape() {
        let stored = serde_json::to_value(artifact(2)).unwrap();
        assert_eq!(stored["unit"], 2);
        assert_eq!(stored["key"], "converted/report_page_2.png");
        assert!(stored.get("base64").is_none());

        let inline = ResultArtifact {
            unit: 1,
            location: ArtifactLocation::Inline {
                base64: "AAAA".into(),
            },
            content_type: "image/png".into(),
            size_bytes: 3,
        };
        let json = serde_json::to_string(&inline).unwrap();
        let back: ResultArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back, inline);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Completed".parse::<JobStatus>().unwrap(), JobStatus::Completed);
        assert!("done".parse::<JobStatus>().is_err());
    }
}
