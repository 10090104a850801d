//! Unit emission: store a rendered unit or keep it inline, and describe it.

use crate::artifact::ArtifactStore;
use crate::engine::RenderedUnit;
use crate::error::JobError;
use crate::job::{ArtifactLocation, ResultArtifact};
use crate::pipeline::encode::to_base64;
use tracing::debug;

/// Output key for a unit: `<prefix>[/<scope>]/<stem><suffix>`.
///
/// Jobs pass their id as `scope` so concurrent jobs on the same source never
/// overwrite each other; the synchronous path uses no scope.
pub fn output_key(prefix: &str, scope: Option<&str>, stem: &str, suffix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    match scope {
        Some(scope) => format!("{prefix}/{scope}/{stem}{suffix}"),
        None => format!("{prefix}/{stem}{suffix}"),
    }
}

/// Upload `unit` under `key`, or encode it inline when `inline` is set.
pub async fn emit_unit(
    artifacts: &dyn ArtifactStore,
    namespace: &str,
    key: &str,
    unit: RenderedUnit,
    inline: bool,
) -> Result<ResultArtifact, JobError> {
    let size_bytes = unit.bytes.len() as u64;

    let location = if inline {
        ArtifactLocation::Inline {
            base64: to_base64(&unit.bytes),
        }
    } else {
        let locator = artifacts
            .put(namespace, key, unit.bytes, &unit.content_type)
            .await
            .map_err(|e| JobError::UnitEmission {
                unit: unit.index,
                detail: format!("Error uploading unit {} to '{key}': {e}", unit.index),
            })?;
        ArtifactLocation::Stored { key: locator }
    };

    debug!(unit = unit.index, size_bytes, inline, "Emitted unit");
    Ok(ResultArtifact {
        unit: unit.index,
        location,
        content_type: unit.content_type,
        size_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryArtifactStore;

    fn unit() -> RenderedUnit {
        RenderedUnit {
            index: 3,
            suffix: "_page_3.png".into(),
            content_type: "image/png".into(),
            bytes: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn keys_follow_prefix_scope_stem_suffix() {
        assert_eq!(
            output_key("converted", None, "report", "_page_1.png"),
            "converted/report_page_1.png"
        );
        assert_eq!(
            output_key("/out/", Some("job-1"), "thesis", ".docx"),
            "out/job-1/thesis.docx"
        );
    }

    #[tokio::test]
    async fn stored_unit_is_uploaded() {
        let store = MemoryArtifactStore::new();
        let artifact = emit_unit(&store, "docs", "converted/r_page_3.png", unit(), false)
            .await
            .unwrap();
        assert_eq!(artifact.key(), Some("converted/r_page_3.png"));
        assert_eq!(artifact.size_bytes, 4);
        assert_eq!(store.keys("docs").await, vec!["converted/r_page_3.png"]);
    }

    #[tokio::test]
    async fn inline_unit_is_not_uploaded() {
        let store = MemoryArtifactStore::new();
        let artifact = emit_unit(&store, "docs", "converted/r_page_3.png", unit(), true)
            .await
            .unwrap();
        assert!(matches!(artifact.location, ArtifactLocation::Inline { .. }));
        assert!(store.keys("docs").await.is_empty());
    }

    #[tokio::test]
    async fn upload_failure_names_the_unit() {
        let store = MemoryArtifactStore::new();
        let err = emit_unit(&store, "docs", "../escape.png", unit(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::UnitEmission { unit: 3, .. }));
    }
}
