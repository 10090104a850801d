//! Immediate (blocking) conversion entry points.
//!
//! These bypass the job lifecycle entirely: no record is created, nothing is
//! checkpointed, and the caller waits for the whole document. Use
//! [`crate::service::JobService::submit`] for documents that may take longer
//! than the caller is willing to hold a request open.
//!
//! Outputs use the plain `<prefix>/<stem><suffix>` naming
//! (e.g. `converted/report_page_1.png`), so converting the same source twice
//! overwrites the previous outputs.

use crate::artifact::ArtifactStore;
use crate::config::RenderParams;
use crate::engine::{ConversionEngine, RenderedUnit};
use crate::error::{EngineError, JobError};
use crate::job::{JobRequest, ResultArtifact};
use crate::pipeline::emit::{emit_unit, output_key};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// Concurrent uploads in the immediate path.
const UPLOAD_CONCURRENCY: usize = 4;

/// Result of an immediate conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Key of the converted source, when it came from the artifact store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
    pub total_units: usize,
    pub dpi: u32,
    pub artifacts: Vec<ResultArtifact>,
}

/// Convert a stored source and upload (or inline) every unit.
///
/// # Example
/// ```rust,no_run
/// use docjobs::{convert_now, FsArtifactStore, PdfRasterEngine, ServiceConfig, SubmitRequest};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ServiceConfig::builder().default_namespace("documents").build()?;
/// let request = SubmitRequest::new("reports/q3.pdf").resolve(&config)?;
/// let store = FsArtifactStore::new("./data/artifacts");
/// let output = convert_now(&store, &PdfRasterEngine::new(), &request).await?;
/// println!("{} pages", output.total_units);
/// # Ok(())
/// # }
/// ```
pub async fn convert_now(
    artifacts: &dyn ArtifactStore,
    engine: &dyn ConversionEngine,
    request: &JobRequest,
) -> Result<ConversionOutput, JobError> {
    let start = Instant::now();
    info!(
        "Converting {}/{} with {}",
        request.namespace,
        request.source_key,
        engine.name()
    );

    let source = fetch_source(artifacts, request).await?;
    let units = run_engine(engine, source, &request.params).await?;
    let total_units = units.len();
    let stem = request.source_stem();

    let mut emitted: Vec<ResultArtifact> = stream::iter(units.into_iter().map(|unit| {
        let key = output_key(&request.output_prefix, None, stem, &unit.suffix);
        async move {
            emit_unit(
                artifacts,
                &request.namespace,
                &key,
                unit,
                request.return_inline,
            )
            .await
        }
    }))
    .buffer_unordered(UPLOAD_CONCURRENCY)
    .try_collect()
    .await?;
    emitted.sort_by_key(|a| a.unit);

    info!(
        "Conversion complete: {} units in {}ms",
        total_units,
        start.elapsed().as_millis()
    );

    Ok(ConversionOutput {
        source_key: Some(request.source_key.clone()),
        total_units,
        dpi: request.params.dpi,
        artifacts: emitted,
    })
}

/// Convert raw bytes and return every unit inline as base64.
///
/// Nothing is read from or written to an artifact store.
pub async fn convert_bytes(
    engine: &dyn ConversionEngine,
    bytes: Vec<u8>,
    params: &RenderParams,
) -> Result<ConversionOutput, JobError> {
    let units = run_engine(engine, bytes, params).await?;
    let total_units = units.len();
    let artifacts = units
        .into_iter()
        .map(|unit| ResultArtifact {
            unit: unit.index,
            size_bytes: unit.bytes.len() as u64,
            location: crate::job::ArtifactLocation::Inline {
                base64: crate::pipeline::encode::to_base64(&unit.bytes),
            },
            content_type: unit.content_type,
        })
        .collect();

    Ok(ConversionOutput {
        source_key: None,
        total_units,
        dpi: params.dpi,
        artifacts,
    })
}

/// Synchronous wrapper around [`convert_now`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_now_sync(
    artifacts: &dyn ArtifactStore,
    engine: &dyn ConversionEngine,
    request: &JobRequest,
) -> Result<ConversionOutput, JobError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| JobError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_now(artifacts, engine, request))
}

// ── Shared with the job runner ───────────────────────────────────────────

/// Fetch the request's source document.
pub(crate) async fn fetch_source(
    artifacts: &dyn ArtifactStore,
    request: &JobRequest,
) -> Result<Vec<u8>, JobError> {
    artifacts
        .get(&request.namespace, &request.source_key)
        .await
        .map_err(|e| JobError::SourceRetrieval {
            namespace: request.namespace.clone(),
            key: request.source_key.clone(),
            detail: match e {
                JobError::ArtifactNotFound { .. } => "not found".to_string(),
                other => other.to_string(),
            },
        })
}

/// Run the engine and reject empty output.
pub(crate) async fn run_engine(
    engine: &dyn ConversionEngine,
    source: Vec<u8>,
    params: &RenderParams,
) -> Result<Vec<RenderedUnit>, JobError> {
    let mut units = engine.convert(source, params).await?;
    if units.is_empty() {
        return Err(EngineError::CorruptInput {
            detail: "document produced no output units".into(),
        }
        .into());
    }
    units.sort_by_key(|u| u.index);
    Ok(units)
}
