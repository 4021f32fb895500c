//! Startup-only configuration: server binding and on-disk layout.

use serde::Deserialize;
use std::path::PathBuf;

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "super::defaults::default_host")]
    pub host: String,

    #[serde(default = "super::defaults::default_port")]
    pub port: u16,

    /// Largest accepted upload body
    #[serde(default = "super::defaults::default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding the document database, vector database, blobs
    /// and per-job scratch space.
    #[serde(default = "super::defaults::default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("folio.db")
    }

    pub fn vector_database_path(&self) -> PathBuf {
        self.data_dir.join("vectors.db")
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.data_dir.join("scratch")
    }

    /// Create the data directory tree if it does not exist yet.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.blobs_dir())?;
        std::fs::create_dir_all(self.scratch_dir())?;
        Ok(())
    }
}
