//! Staged input bytes referenced from job envelopes.
//!
//! Envelopes only carry [`BlobHandle`]s. The worker resolves them through the
//! same [`BlobStore`] implementation the producer staged them with, so the
//! pipeline does not care whether bytes live on local disk or in memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque reference to staged bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobHandle(String);

impl BlobHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased extension including the dot, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.0)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
    }

    /// Content type declared by the handle's extension.
    pub fn declared_content_type(&self) -> &'static str {
        match self.extension().as_deref() {
            Some(".jpg" | ".jpeg") => "image/jpeg",
            Some(".png") => "image/png",
            Some(".webp") => "image/webp",
            Some(".bmp") => "image/bmp",
            Some(".gif") => "image/gif",
            _ => "application/octet-stream",
        }
    }

    /// Final path segment, used as the object name on the media host.
    pub fn file_name(&self) -> &str {
        self.0.rsplit(['/', '\\']).next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage for bytes that must survive until a worker picks the job up.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `bytes` under a fresh handle ending in `extension` (e.g. ".png").
    async fn stage(&self, bytes: &[u8], extension: &str) -> Result<BlobHandle, BlobError>;

    async fn exists(&self, handle: &BlobHandle) -> Result<bool, BlobError>;

    async fn read(&self, handle: &BlobHandle) -> Result<Vec<u8>, BlobError>;

    /// Store an intermediate derived from `handle`, e.g. a compressed copy.
    async fn write_derived(
        &self,
        handle: &BlobHandle,
        suffix: &str,
        bytes: &[u8],
    ) -> Result<BlobHandle, BlobError>;

    /// Remove a blob. Removing a blob that is already gone is not an error.
    async fn remove(&self, handle: &BlobHandle) -> Result<(), BlobError>;
}

/// Extension for an uploaded file name, defaulting to ".jpg".
pub fn extension_for_filename(filename: Option<&str>) -> String {
    filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| format!(".{e}"))
        .unwrap_or_else(|| ".jpg".to_string())
}

/// Extension for a raw upload, picked from its `Content-Type` header.
pub fn extension_for_content_type(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some(ct) if ct.contains("png") => ".png",
        Some(ct) if ct.contains("jpeg") || ct.contains("jpg") => ".jpg",
        Some(ct) if ct.contains("webp") => ".webp",
        _ => ".jpg",
    }
}

/// Blobs stored as files in a staging directory.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create the store, making sure the staging directory exists.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn stage(&self, bytes: &[u8], extension: &str) -> Result<BlobHandle, BlobError> {
        let path = self.root.join(format!("{}{}", Uuid::new_v4(), extension));
        let handle = BlobHandle::new(path.to_string_lossy());

        if let Err(e) = tokio::fs::write(&path, bytes).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }

        tracing::debug!(handle = %handle, size = bytes.len(), "Staged input");
        Ok(handle)
    }

    async fn exists(&self, handle: &BlobHandle) -> Result<bool, BlobError> {
        Ok(tokio::fs::try_exists(handle.as_str()).await?)
    }

    async fn read(&self, handle: &BlobHandle) -> Result<Vec<u8>, BlobError> {
        match tokio::fs::read(handle.as_str()).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(handle.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_derived(
        &self,
        handle: &BlobHandle,
        suffix: &str,
        bytes: &[u8],
    ) -> Result<BlobHandle, BlobError> {
        let derived = BlobHandle::new(format!("{}{}", handle.as_str(), suffix));
        tokio::fs::write(derived.as_str(), bytes).await?;
        Ok(derived)
    }

    async fn remove(&self, handle: &BlobHandle) -> Result<(), BlobError> {
        match tokio::fs::remove_file(handle.as_str()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Blobs kept in process memory.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<BlobHandle, Vec<u8>>>,
    fail_stage: Mutex<bool>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `stage` calls fail.
    pub fn fail_staging(&self, fail: bool) {
        *self.fail_stage.lock() = fail;
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }

    pub fn contains(&self, handle: &BlobHandle) -> bool {
        self.blobs.lock().contains_key(handle)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn stage(&self, bytes: &[u8], extension: &str) -> Result<BlobHandle, BlobError> {
        if *self.fail_stage.lock() {
            return Err(BlobError::Io(std::io::Error::other("staging disabled")));
        }
        let handle = BlobHandle::new(format!("mem://{}{}", Uuid::new_v4(), extension));
        self.blobs.lock().insert(handle.clone(), bytes.to_vec());
        Ok(handle)
    }

    async fn exists(&self, handle: &BlobHandle) -> Result<bool, BlobError> {
        Ok(self.contains(handle))
    }

    async fn read(&self, handle: &BlobHandle) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .lock()
            .get(handle)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(handle.clone()))
    }

    async fn write_derived(
        &self,
        handle: &BlobHandle,
        suffix: &str,
        bytes: &[u8],
    ) -> Result<BlobHandle, BlobError> {
        let derived = BlobHandle::new(format!("{}{}", handle.as_str(), suffix));
        self.blobs.lock().insert(derived.clone(), bytes.to_vec());
        Ok(derived)
    }

    async fn remove(&self, handle: &BlobHandle) -> Result<(), BlobError> {
        self.blobs.lock().remove(handle);
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(BlobHandle),

    #[error("Blob I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_content_type_from_extension() {
        assert_eq!(BlobHandle::new("/tmp/a.JPG").declared_content_type(), "image/jpeg");
        assert_eq!(BlobHandle::new("/tmp/a.png").declared_content_type(), "image/png");
        assert_eq!(BlobHandle::new("/tmp/a.bmp").declared_content_type(), "image/bmp");
        assert_eq!(
            BlobHandle::new("/tmp/noext").declared_content_type(),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_extension_defaults() {
        assert_eq!(extension_for_filename(Some("cat.png")), ".png");
        assert_eq!(extension_for_filename(Some("cat")), ".jpg");
        assert_eq!(extension_for_filename(None), ".jpg");
        assert_eq!(extension_for_content_type(Some("image/png")), ".png");
        assert_eq!(extension_for_content_type(Some("image/webp")), ".webp");
        assert_eq!(extension_for_content_type(Some("application/octet-stream")), ".jpg");
        assert_eq!(extension_for_content_type(None), ".jpg");
    }

    #[test]
    fn test_file_name_is_last_segment() {
        assert_eq!(BlobHandle::new("/tmp/uploads/x.jpg").file_name(), "x.jpg");
        assert_eq!(BlobHandle::new("mem://y.png").file_name(), "y.png");
    }

    #[tokio::test]
    async fn test_local_store_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().join("staging")).await.unwrap();

        let handle = store.stage(b"bytes", ".png").await.unwrap();
        assert!(handle.as_str().ends_with(".png"));
        assert!(store.exists(&handle).await.unwrap());
        assert_eq!(store.read(&handle).await.unwrap(), b"bytes");

        let derived = store
            .write_derived(&handle, ".compressed.jpg", b"small")
            .await
            .unwrap();
        assert!(derived.as_str().ends_with(".png.compressed.jpg"));

        store.remove(&handle).await.unwrap();
        store.remove(&handle).await.unwrap();
        assert!(!store.exists(&handle).await.unwrap());
        assert!(matches!(
            store.read(&handle).await,
            Err(BlobError::NotFound(_))
        ));
    }
}
