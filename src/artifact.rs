//! Artifact storage: where source documents are read from and where
//! converted units are uploaded.
//!
//! Objects are addressed by `(namespace, key)`, the way an object store
//! addresses them by bucket and key. The locator returned by
//! [`ArtifactStore::put`] is the key itself.

use crate::error::JobError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

static NAMESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]{1,62}$").expect("valid regex"));

/// Bucket-style namespace names: lowercase alphanumerics, `.`, `_`, `-`,
/// 2–63 characters, starting with a letter or digit.
pub fn is_valid_namespace(namespace: &str) -> bool {
    NAMESPACE_RE.is_match(namespace)
}

/// Relative, `/`-separated keys without empty, `.` or `..` segments.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 1024
        && !key.contains(['\\', '\0'])
        && key
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

/// Read/write access to stored documents.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch the object's bytes. A missing object is
    /// [`JobError::ArtifactNotFound`].
    async fn get(&self, namespace: &str, key: &str) -> Result<Vec<u8>, JobError>;

    /// Store `bytes` under `key`, replacing any previous object, and return
    /// its locator.
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, JobError>;
}

fn check_address(namespace: &str, key: &str) -> Result<(), JobError> {
    if !is_valid_namespace(namespace) {
        return Err(JobError::validation(
            "namespace",
            format!("'{namespace}' is not a valid namespace name"),
        ));
    }
    if !is_valid_key(key) {
        return Err(JobError::validation(
            "key",
            format!("'{key}' is not a valid relative key"),
        ));
    }
    Ok(())
}

// ── Filesystem ───────────────────────────────────────────────────────────

/// Objects stored as plain files under `<root>/<namespace>/<key>`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of an object.
    pub fn path_of(&self, namespace: &str, key: &str) -> Result<PathBuf, JobError> {
        check_address(namespace, key)?;
        Ok(self.root.join(namespace).join(key))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Vec<u8>, JobError> {
        let path = self.path_of(namespace, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(JobError::ArtifactNotFound {
                    namespace: namespace.to_string(),
                    key: key.to_string(),
                })
            }
            Err(e) => Err(JobError::storage("artifact read", e)),
        }
    }

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, JobError> {
        let path = self.path_of(namespace, key)?;
        atomic_write(&path, &bytes).await?;
        debug!(namespace, key, size = bytes.len(), "Stored artifact");
        Ok(key.to_string())
    }
}

/// Write to `<path>.tmp` then rename, so readers never see a partial file.
pub(crate) async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), JobError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| JobError::storage("create directory", e))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| JobError::storage("write", e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| JobError::storage("rename", e))?;
    Ok(())
}

// ── In-memory ────────────────────────────────────────────────────────────

/// Process-local object map. Useful for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactStore {
    objects: Arc<RwLock<HashMap<(String, String), Vec<u8>>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly.
    pub async fn insert(&self, namespace: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        self.objects
            .write()
            .await
            .insert((namespace.to_string(), key.to_string()), bytes.into());
    }

    /// Keys present in a namespace, sorted.
    pub async fn keys(&self, namespace: &str) -> Vec<String> {
        let objects = self.objects.read().await;
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Vec<u8>, JobError> {
        check_address(namespace, key)?;
        self.objects
            .read()
            .await
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| JobError::ArtifactNotFound {
                namespace: namespace.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, JobError> {
        check_address(namespace, key)?;
        self.objects
            .write()
            .await
            .insert((namespace.to_string(), key.to_string()), bytes);
        Ok(key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_rules() {
        assert!(is_valid_namespace("documents"));
        assert!(is_valid_namespace("my-bucket.v2"));
        assert!(!is_valid_namespace("Docs"));
        assert!(!is_valid_namespace("../etc"));
        assert!(!is_valid_namespace("a"));
        assert!(!is_valid_namespace(""));
    }

    #[test]
    fn key_rules() {
        assert!(is_valid_key("converted/report_page_1.png"));
        assert!(is_valid_key("a.pdf"));
        assert!(!is_valid_key("/etc/passwd"));
        assert!(!is_valid_key("a/../../b"));
        assert!(!is_valid_key("a//b"));
        assert!(!is_valid_key(""));
    }

    #[tokio::test]
    async fn fs_store_roundtrip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        let locator = store
            .put("docs", "out/x.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();
        assert_eq!(locator, "out/x.png");
        assert!(dir.path().join("docs/out/x.png").exists());
        assert!(!dir.path().join("docs/out/x.png.tmp").exists());
        assert_eq!(store.get("docs", "out/x.png").await.unwrap(), vec![1, 2, 3]);

        let err = store.get("docs", "nope.pdf").await.unwrap_err();
        assert!(matches!(err, JobError::ArtifactNotFound { .. }));
    }

    #[tokio::test]
    async fn fs_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let err = store.get("docs", "../secret").await.unwrap_err();
        assert!(matches!(err, JobError::Validation { .. }));
    }

    #[tokio::test]
    async fn memory_store_lists_keys() {
        let store = MemoryArtifactStore::new();
        store.insert("docs", "b.pdf", b"b".to_vec()).await;
        store.put("docs", "a.png", vec![0], "image/png").await.unwrap();
        store.insert("other", "c.pdf", b"c".to_vec()).await;
        assert_eq!(store.keys("docs").await, vec!["a.png", "b.pdf"]);
    }
}
