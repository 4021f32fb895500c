//! Raw configuration sections read by the ingestion pipeline.
//!
//! These mirror the config file / environment layout one-to-one. They are
//! validated into [`super::PipelineSettings`] once at startup.

use serde::Deserialize;

/// OCR fallback configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "super::defaults::default_ocr_enabled")]
    pub enabled: bool,

    /// Tesseract language codes, e.g. `["eng", "deu"]`
    #[serde(default = "super::defaults::default_ocr_languages")]
    pub languages: Vec<String>,

    /// Candidate rasterization resolutions, tried in order. Empty means
    /// "use `fallback_dpi` only".
    #[serde(default)]
    pub dpi_candidates: Vec<u32>,

    #[serde(default = "super::defaults::default_fallback_dpi")]
    pub fallback_dpi: u32,

    /// Native text below this many characters triggers OCR
    #[serde(default = "super::defaults::default_text_threshold")]
    pub text_threshold: usize,

    /// Cap on pages rasterized per pass. Unset means every page.
    #[serde(default)]
    pub max_pages: Option<u32>,

    #[serde(default = "super::defaults::default_tesseract_bin")]
    pub tesseract_bin: String,

    #[serde(default = "super::defaults::default_page_timeout_secs")]
    pub page_timeout_secs: u64,
}

/// Chunking configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "super::defaults::default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "super::defaults::default_chunk_overlap")]
    pub chunk_overlap: usize,
}

/// Embedding service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "super::defaults::default_embeddings_url")]
    pub base_url: String,

    #[serde(default = "super::defaults::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Worker pool and retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "super::defaults::default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "super::defaults::default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff between attempts
    #[serde(default = "super::defaults::default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Idle sleep between queue polls
    #[serde(default = "super::defaults::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Stale-document reconciliation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "super::defaults::default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Period of the background sweep. Zero disables it; inline
    /// reconciliation on list requests still runs.
    #[serde(default = "super::defaults::default_reconcile_interval_secs")]
    pub interval_secs: u64,
}
