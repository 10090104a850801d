//! Error types for the docjobs library.
//!
//! Three error types reflect three distinct audiences:
//!
//! * [`JobError`]: everything the job service, the stores and the runner can
//!   report. Validation problems are returned synchronously from
//!   [`crate::service::JobService::submit`]; failures during background
//!   execution never reach a caller directly and are instead rendered into the
//!   job's `error_message`.
//!
//! * [`EngineError`]: a conversion engine could not turn the source bytes
//!   into output units. Wrapped by [`JobError::Engine`].
//!
//! * [`WaitError`]: returned by the client-side wait helper. A job that
//!   *failed* and a wait that *timed out* are different outcomes and must stay
//!   distinguishable.

use crate::job::JobStatus;
use thiserror::Error;

/// All errors returned by the job service, stores and collaborators.
#[derive(Debug, Error)]
pub enum JobError {
    // ── Submission errors ─────────────────────────────────────────────────
    /// A submission field is missing or invalid. Nothing was persisted.
    #[error("Invalid submission: {field} {reason}")]
    Validation { field: &'static str, reason: String },

    // ── Lookup errors ─────────────────────────────────────────────────────
    /// No (unexpired) job record exists for this id.
    #[error("Job '{job_id}' not found (unknown id or past its retention window)")]
    JobNotFound { job_id: String },

    /// The artifact store has no object under this key.
    #[error("Artifact '{key}' not found in namespace '{namespace}'")]
    ArtifactNotFound { namespace: String, key: String },

    /// A record with this id already exists.
    #[error("Job '{job_id}' already exists")]
    DuplicateKey { job_id: String },

    // ── Execution errors ──────────────────────────────────────────────────
    /// The source document could not be fetched from the artifact store.
    #[error("Failed to retrieve source '{key}' from namespace '{namespace}': {detail}")]
    SourceRetrieval {
        namespace: String,
        key: String,
        detail: String,
    },

    /// The conversion engine rejected or failed on the source.
    #[error("Conversion failed: {0}")]
    Engine(#[from] EngineError),

    /// A produced unit could not be uploaded or encoded.
    #[error("Failed to emit unit {unit}: {detail}")]
    UnitEmission { unit: usize, detail: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// The record store or artifact store is unavailable or misbehaved.
    #[error("Storage failure during {operation}: {detail}")]
    Storage {
        operation: &'static str,
        detail: String,
    },

    // ── State errors ──────────────────────────────────────────────────────
    /// The job already reached a terminal state and cannot be mutated.
    #[error("Job '{job_id}' is already {status} and cannot be modified")]
    StaleState { job_id: String, status: JobStatus },

    /// The requested status change is not part of the lifecycle.
    #[error("Job '{job_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    // ── Notification errors ───────────────────────────────────────────────
    /// The completion callback could not be delivered.
    #[error("Callback to '{url}' failed: {detail}")]
    CallbackFailed { url: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        JobError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn storage(operation: &'static str, detail: impl ToString) -> Self {
        JobError::Storage {
            operation,
            detail: detail.to_string(),
        }
    }

    /// True when the job was finished or removed by someone else while we
    /// were working on it. The runner stops quietly on these.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            JobError::StaleState { .. } | JobError::JobNotFound { .. }
        )
    }
}

/// A failure inside a conversion engine.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum EngineError {
    /// The source is not something this engine can read.
    #[error("unsupported input: {detail}")]
    UnsupportedInput { detail: String },

    /// The source looked right but could not be parsed.
    #[error("source document is corrupt: {detail}")]
    CorruptInput { detail: String },

    /// The PDF is encrypted.
    #[error("source PDF is encrypted and requires a password")]
    PasswordProtected,

    /// Rasterising a page failed.
    #[error("rasterisation failed for unit {unit}: {detail}")]
    RasterisationFailed { unit: usize, detail: String },

    /// Encoding a rendered unit failed.
    #[error("encoding failed for unit {unit}: {detail}")]
    EncodeFailed { unit: usize, detail: String },

    /// An external converter exited unsuccessfully.
    #[error("{tool} exited with {code:?}: {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    /// An external converter could not be started.
    #[error("{tool} could not be started: {detail}\nInstall it or point the engine at its location.")]
    ToolMissing { tool: String, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    BindingFailed(String),

    /// Unexpected internal error (e.g. a blocking task panicked).
    #[error("internal engine error: {0}")]
    Internal(String),
}

/// Outcome of [`crate::wait::wait_for_job`] other than success.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The job did not reach a terminal state in time. The job itself keeps
    /// running server-side.
    #[error("Timed out after {waited_ms}ms waiting for job '{job_id}' (last status: {last_status})")]
    Timeout {
        job_id: String,
        waited_ms: u64,
        last_status: JobStatus,
    },

    /// The job reached `failed`.
    #[error("Job '{job_id}' failed: {message}")]
    JobFailed { job_id: String, message: String },

    /// Looking up the job status failed.
    #[error(transparent)]
    Status(#[from] JobError),
}

impl WaitError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display_names_field() {
        let e = JobError::validation("source_key", "is required");
        assert_eq!(e.to_string(), "Invalid submission: source_key is required");
    }

    #[test]
    fn source_retrieval_mentions_retrieve() {
        let e = JobError::SourceRetrieval {
            namespace: "docs".into(),
            key: "a.pdf".into(),
            detail: "missing".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("retrieve"), "got: {msg}");
        assert!(msg.contains("a.pdf"));
    }

    #[test]
    fn engine_error_wraps_into_job_error() {
        let e: JobError = EngineError::PasswordProtected.into();
        assert!(e.to_string().starts_with("Conversion failed"));
    }

    #[test]
    fn stale_classification() {
        let stale = JobError::StaleState {
            job_id: "j".into(),
            status: JobStatus::Completed,
        };
        assert!(stale.is_stale());
        assert!(JobError::JobNotFound { job_id: "j".into() }.is_stale());
        assert!(!JobError::Internal("x".into()).is_stale());
    }

    #[test]
    fn timeout_is_not_job_failure() {
        let t = WaitError::Timeout {
            job_id: "j".into(),
            waited_ms: 50,
            last_status: JobStatus::Processing,
        };
        let f = WaitError::JobFailed {
            job_id: "j".into(),
            message: "boom".into(),
        };
        assert!(t.is_timeout());
        assert!(!f.is_timeout());
        assert!(t.to_string().contains("processing"));
    }
}
