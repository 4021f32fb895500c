//! Default value functions for configuration sections.

use std::path::PathBuf;

use super::pipeline::{
    ChunkingConfig, EmbeddingsConfig, OcrConfig, ReconcilerConfig, WorkersConfig,
};
use super::static_config::{ServerConfig, StorageConfig};

// ==================== Top-level Section Defaults ====================

pub(crate) fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
        max_upload_bytes: default_max_upload_bytes(),
    }
}

pub(crate) fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

pub(crate) fn default_ocr() -> OcrConfig {
    OcrConfig {
        enabled: default_ocr_enabled(),
        languages: default_ocr_languages(),
        dpi_candidates: Vec::new(),
        fallback_dpi: default_fallback_dpi(),
        text_threshold: default_text_threshold(),
        max_pages: None,
        tesseract_bin: default_tesseract_bin(),
        page_timeout_secs: default_page_timeout_secs(),
    }
}

pub(crate) fn default_chunking() -> ChunkingConfig {
    ChunkingConfig {
        chunk_size: default_chunk_size(),
        chunk_overlap: default_chunk_overlap(),
    }
}

pub(crate) fn default_embeddings() -> EmbeddingsConfig {
    EmbeddingsConfig {
        base_url: default_embeddings_url(),
        request_timeout_secs: default_request_timeout_secs(),
    }
}

pub(crate) fn default_workers() -> WorkersConfig {
    WorkersConfig {
        concurrency: default_concurrency(),
        max_attempts: default_max_attempts(),
        backoff_base_ms: default_backoff_base_ms(),
        poll_interval_ms: default_poll_interval_ms(),
    }
}

pub(crate) fn default_reconciler() -> ReconcilerConfig {
    ReconcilerConfig {
        stale_after_secs: default_stale_after_secs(),
        interval_secs: default_reconcile_interval_secs(),
    }
}

// ==================== Server / Storage ====================

pub(crate) fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub(crate) fn default_port() -> u16 {
    8080
}

pub(crate) fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}

pub(crate) fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

// ==================== OCR ====================

pub(crate) fn default_ocr_enabled() -> bool {
    true
}

pub(crate) fn default_ocr_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

pub(crate) fn default_fallback_dpi() -> u32 {
    300
}

pub(crate) fn default_text_threshold() -> usize {
    800
}

pub(crate) fn default_tesseract_bin() -> String {
    "tesseract".to_string()
}

pub(crate) fn default_page_timeout_secs() -> u64 {
    120
}

// ==================== Chunking / Embeddings ====================

pub(crate) fn default_chunk_size() -> usize {
    1000
}

pub(crate) fn default_chunk_overlap() -> usize {
    200
}

pub(crate) fn default_embeddings_url() -> String {
    "http://localhost:8000".to_string()
}

pub(crate) fn default_request_timeout_secs() -> u64 {
    120
}

// ==================== Workers / Reconciler ====================

pub(crate) fn default_concurrency() -> usize {
    4
}

pub(crate) fn default_max_attempts() -> u32 {
    3
}

pub(crate) fn default_backoff_base_ms() -> u64 {
    1000
}

pub(crate) fn default_poll_interval_ms() -> u64 {
    500
}

pub(crate) fn default_stale_after_secs() -> u64 {
    20
}

pub(crate) fn default_reconcile_interval_secs() -> u64 {
    60
}
