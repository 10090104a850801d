//! # docjobs
//!
//! Asynchronous document conversion jobs: PDF → PNG pages and
//! LaTeX → DOCX (→ PDF).
//!
//! ## Why jobs?
//!
//! Rasterising a few hundred pages at 300 DPI takes far longer than any
//! caller wants to hold a request open. Instead a submission returns a job
//! id immediately; the conversion runs in the background, checkpointing its
//! progress into a durable record that clients poll (or wait on) until the
//! job is `completed` or `failed`. An optional callback URL is notified once
//! the job finishes.
//!
//! ## Lifecycle
//!
//! ```text
//! submit ─▶ submitted ─▶ processing ─┬─▶ completed (progress 100, artifacts)
//!                                    └─▶ failed    (progress kept, error_message)
//!
//! processing checkpoints: 10 started · 20 source fetched · 40 converted
//!                         · 40→90 per emitted unit · 100 completed
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docjobs::{
//!     ConversionKind, FsArtifactStore, FsJobStore, JobService, PdfRasterEngine,
//!     ServiceConfig, SubmitRequest, WaitOptions,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = JobService::builder()
//!         .config(ServiceConfig::builder().default_namespace("documents").build()?)
//!         .store(Arc::new(FsJobStore::open("./data/jobs").await?))
//!         .artifacts(Arc::new(FsArtifactStore::new("./data/artifacts")))
//!         .engine(ConversionKind::PdfToPng, Arc::new(PdfRasterEngine::new()))
//!         .start()
//!         .await?;
//!
//!     let receipt = service.submit(SubmitRequest::new("reports/q3.pdf")).await?;
//!     let job = service.wait(&receipt.job_id, WaitOptions::default()).await?;
//!     for artifact in &job.artifacts {
//!         println!("page {} → {:?}", artifact.unit, artifact.key());
//!     }
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docjobs` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docjobs = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifact;
pub mod callback;
pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod runner;
pub mod service;
pub mod store;
pub mod wait;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use artifact::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
pub use callback::{CallbackPayload, HttpNotifier, Notifier};
pub use config::{ConversionKind, RenderParams, ServiceConfig, ServiceConfigBuilder};
pub use convert::{convert_bytes, convert_now, convert_now_sync, ConversionOutput};
pub use engine::{ConversionEngine, Engines, RenderedUnit};
pub use error::{EngineError, JobError, WaitError};
pub use job::{
    ArtifactLocation, Job, JobList, JobRequest, JobStatus, JobSummary, JobUpdate, ResultArtifact,
    SubmitReceipt, SubmitRequest,
};
pub use pipeline::latex::LatexEngine;
pub use pipeline::render::PdfRasterEngine;
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use service::{JobService, JobServiceBuilder};
pub use store::{FsJobStore, JobStore, MemoryJobStore};
pub use wait::{wait_for_job, wait_for_job_with, StatusSource, WaitOptions};
