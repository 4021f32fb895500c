//! Blob storage for uploaded PDF bytes.
//!
//! Blobs are addressed by an opaque `blob_ref`. Ingestion streams a blob into
//! its scratch directory with `fetch_to`, which also reports the SHA-256 of
//! the copied bytes so the worker can check it against the recorded hash.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{ServiceError, ServiceResult};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Size and digest of a blob copied to local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBlob {
    pub size_bytes: u64,
    pub sha256: String,
}

/// Storage for original document bytes
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `blob_ref`, replacing any previous content
    async fn put(&self, blob_ref: &str, bytes: &[u8]) -> ServiceResult<()>;

    /// Copy the blob to `dest`
    async fn fetch_to(&self, blob_ref: &str, dest: &Path) -> ServiceResult<FetchedBlob>;

    /// Delete the blob. Returns `false` if it did not exist.
    async fn delete(&self, blob_ref: &str) -> ServiceResult<bool>;
}

/// SHA-256 of an in-memory buffer as lowercase hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Blob refs are used as file names, so they must not contain path syntax.
pub fn validate_blob_ref(blob_ref: &str) -> ServiceResult<()> {
    let valid = !blob_ref.is_empty()
        && blob_ref.len() <= 128
        && !blob_ref.starts_with('.')
        && blob_ref
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(ServiceError::InvalidRequest {
            message: format!("invalid blob reference '{}'", blob_ref),
        })
    }
}

/// Filesystem blob store: one file per blob under a root directory
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, blob_ref: &str) -> ServiceResult<PathBuf> {
        validate_blob_ref(blob_ref)?;
        Ok(self.root.join(blob_ref))
    }
}

fn unavailable(blob_ref: &str, error: impl std::fmt::Display) -> ServiceError {
    ServiceError::BlobUnavailable {
        blob_ref: blob_ref.to_string(),
        message: error.to_string(),
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, blob_ref: &str, bytes: &[u8]) -> ServiceResult<()> {
        let path = self.path_for(blob_ref)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| unavailable(blob_ref, e))?;

        // Write then rename so readers never observe a partial blob
        let staging = self.root.join(format!(".{}.partial", blob_ref));
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|e| unavailable(blob_ref, e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| unavailable(blob_ref, e))?;

        Ok(())
    }

    async fn fetch_to(&self, blob_ref: &str, dest: &Path) -> ServiceResult<FetchedBlob> {
        let path = self.path_for(blob_ref)?;

        let mut source = tokio::fs::File::open(&path)
            .await
            .map_err(|e| unavailable(blob_ref, e))?;
        let mut target = tokio::fs::File::create(dest)
            .await
            .map_err(|e| unavailable(blob_ref, e))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut size_bytes = 0u64;

        loop {
            let read = source
                .read(&mut buffer)
                .await
                .map_err(|e| unavailable(blob_ref, e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            target
                .write_all(&buffer[..read])
                .await
                .map_err(|e| unavailable(blob_ref, e))?;
            size_bytes += read as u64;
        }
        target.flush().await.map_err(|e| unavailable(blob_ref, e))?;

        Ok(FetchedBlob {
            size_bytes,
            sha256: format!("{:x}", hasher.finalize()),
        })
    }

    async fn delete(&self, blob_ref: &str) -> ServiceResult<bool> {
        let path = self.path_for(blob_ref)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(unavailable(blob_ref, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_hex() {
        // SHA-256 of "hello world"
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_blob_ref_validation() {
        assert!(validate_blob_ref("0b6d2c3e-blob.pdf").is_ok());
        assert!(validate_blob_ref("").is_err());
        assert!(validate_blob_ref("../etc/passwd").is_err());
        assert!(validate_blob_ref("a/b").is_err());
        assert!(validate_blob_ref(".hidden").is_err());
    }

    #[tokio::test]
    async fn test_put_fetch_delete() {
        let root = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let store = FsBlobStore::new(root.path().join("blobs"));

        store.put("blob-1", b"%PDF-1.7 hello world").await.unwrap();

        let dest = scratch.path().join("source.pdf");
        let fetched = store.fetch_to("blob-1", &dest).await.unwrap();
        assert_eq!(fetched.size_bytes, 20);
        assert_eq!(fetched.sha256, sha256_hex(b"%PDF-1.7 hello world"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-1.7 hello world");

        assert!(store.delete("blob-1").await.unwrap());
        assert!(!store.delete("blob-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_missing_blob_is_retryable() {
        let root = TempDir::new().unwrap();
        let store = FsBlobStore::new(root.path());

        let err = store
            .fetch_to("missing", &root.path().join("out.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BlobUnavailable { .. }));
        assert!(err.is_retryable());
    }
}
