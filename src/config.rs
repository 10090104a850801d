//! Configuration types for the job service and per-job rendering.
//!
//! Service-wide behaviour is controlled through [`ServiceConfig`], built via
//! its [`ServiceConfigBuilder`]. Per-job knobs (resolution, optimisation,
//! PDF generation) travel with the job as [`RenderParams`] so a record always
//! describes exactly how its outputs were produced.

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lowest accepted rendering DPI.
pub const MIN_DPI: u32 = 72;
/// Highest accepted rendering DPI.
pub const MAX_DPI: u32 = 600;
/// Upper bound for [`ServiceConfig::max_rendered_pixels`].
pub const MAX_RENDERED_PIXELS: u32 = 65_535;

/// Configuration for a [`crate::service::JobService`].
///
/// # Example
/// ```rust
/// use docjobs::ServiceConfig;
/// use std::time::Duration;
///
/// let config = ServiceConfig::builder()
///     .workers(2)
///     .default_namespace("documents")
///     .retention(Duration::from_secs(24 * 3600))
///     .build()
///     .unwrap();
/// assert_eq!(config.workers, 2);
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// How long a job record stays visible after creation. Default: 7 days.
    pub retention: Duration,

    /// Number of jobs executed concurrently in-process. Default: 4.
    ///
    /// `0` puts the service in submit-only mode: records are persisted but
    /// executed by a separate worker process sharing the same store.
    pub workers: usize,

    /// Capacity of the in-process job queue. Default: 256.
    pub queue_capacity: usize,

    /// Namespace used when a submission does not name one. Default: None.
    pub default_namespace: Option<String>,

    /// Output prefix used when a submission does not name one. Default: "converted".
    pub default_output_prefix: String,

    /// DPI used when a submission does not name one. Default: 300.
    pub default_dpi: u32,

    /// Longest rendered edge in pixels, whatever the DPI. Default: 10 000.
    ///
    /// An A0 poster at 300 DPI is ~10 000 × 14 000 px; the cap keeps a
    /// single page from exhausting memory.
    pub max_rendered_pixels: u32,

    /// Timeout for outbound completion callbacks in seconds. Default: 10.
    pub callback_timeout_secs: u64,

    /// Period of the maintenance loop (pickup, stale reaping, purging).
    /// Default: None (no loop; recovery still runs once at start-up).
    pub maintenance_interval: Option<Duration>,

    /// `processing` jobs without an update for this long are failed by the
    /// maintenance loop. Default: None (never reaped).
    pub stale_after: Option<Duration>,

    /// Queue every `submitted` job found in the store when the service
    /// starts. Default: true.
    ///
    /// Turn off for a process that should only execute its own submissions
    /// while another process serves the shared store.
    pub recover_on_start: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(7 * 24 * 3600),
            workers: 4,
            queue_capacity: 256,
            default_namespace: None,
            default_output_prefix: "converted".to_string(),
            default_dpi: 300,
            max_rendered_pixels: 10_000,
            callback_timeout_secs: 10,
            maintenance_interval: None,
            stale_after: None,
            recover_on_start: true,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("retention", &self.retention)
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity)
            .field("default_namespace", &self.default_namespace)
            .field("default_output_prefix", &self.default_output_prefix)
            .field("default_dpi", &self.default_dpi)
            .field("callback_timeout_secs", &self.callback_timeout_secs)
            .field("maintenance_interval", &self.maintenance_interval)
            .field("stale_after", &self.stale_after)
            .field("recover_on_start", &self.recover_on_start)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n;
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.config.queue_capacity = n.max(1);
        self
    }

    pub fn default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.default_namespace = Some(namespace.into());
        self
    }

    pub fn default_output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.default_output_prefix = prefix.into();
        self
    }

    pub fn default_dpi(mut self, dpi: u32) -> Self {
        self.config.default_dpi = dpi.clamp(MIN_DPI, MAX_DPI);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.clamp(100, MAX_RENDERED_PIXELS);
        self
    }

    pub fn callback_timeout_secs(mut self, secs: u64) -> Self {
        self.config.callback_timeout_secs = secs.max(1);
        self
    }

    pub fn maintenance_interval(mut self, every: Duration) -> Self {
        self.config.maintenance_interval = Some(every);
        self
    }

    pub fn stale_after(mut self, after: Duration) -> Self {
        self.config.stale_after = Some(after);
        self
    }

    pub fn recover_on_start(mut self, recover: bool) -> Self {
        self.config.recover_on_start = recover;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, JobError> {
        let c = &self.config;
        if c.retention.is_zero() {
            return Err(JobError::InvalidConfig("retention must be > 0".into()));
        }
        if c.workers > 64 {
            return Err(JobError::InvalidConfig(format!(
                "workers must be 0–64, got {}",
                c.workers
            )));
        }
        if c.default_output_prefix.trim_matches('/').is_empty() {
            return Err(JobError::InvalidConfig(
                "default output prefix must not be empty".into(),
            ));
        }
        if let Some(ns) = &c.default_namespace {
            if !crate::artifact::is_valid_namespace(ns) {
                return Err(JobError::InvalidConfig(format!(
                    "invalid default namespace '{ns}'"
                )));
            }
        }
        if matches!(c.maintenance_interval, Some(d) if d.is_zero()) {
            return Err(JobError::InvalidConfig(
                "maintenance interval must be > 0".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Per-job parameters ───────────────────────────────────────────────────

/// Which conversion a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionKind {
    /// Rasterise every PDF page to a PNG image. (default)
    #[default]
    PdfToPng,
    /// Convert a LaTeX source to DOCX, optionally also to PDF.
    LatexToDocx,
}

impl fmt::Display for ConversionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionKind::PdfToPng => write!(f, "pdf_to_png"),
            ConversionKind::LatexToDocx => write!(f, "latex_to_docx"),
        }
    }
}

/// Rendering parameters snapshotted into each job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderParams {
    /// Rendering resolution in dots per inch.
    pub dpi: u32,
    /// Spend more CPU for smaller PNG files.
    pub optimize: bool,
    /// Longest rendered edge in pixels.
    pub max_rendered_pixels: u32,
    /// LaTeX only: also produce a PDF from the generated DOCX.
    #[serde(default)]
    pub generate_pdf: bool,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            dpi: 300,
            optimize: true,
            max_rendered_pixels: 10_000,
            generate_pdf: false,
        }
    }
}
