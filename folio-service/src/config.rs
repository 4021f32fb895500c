//! Service configuration.
//!
//! Raw sections are deserialized with the `config` crate and then validated
//! once into [`PipelineSettings`]. Malformed values abort startup instead of
//! surfacing later inside a job.

mod defaults;
mod loader;
mod pipeline;
mod static_config;

use serde::Deserialize;
use std::time::Duration;

use crate::error::{ServiceError, ServiceResult};

pub use loader::load_config;
pub use pipeline::{ChunkingConfig, EmbeddingsConfig, OcrConfig, ReconcilerConfig, WorkersConfig};
pub use static_config::{ServerConfig, StorageConfig};

/// Lowest and highest DPI accepted for OCR rasterization
const DPI_RANGE: std::ops::RangeInclusive<u32> = 50..=1200;

/// Complete configuration as read from file and environment
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "defaults::default_server")]
    pub server: ServerConfig,

    #[serde(default = "defaults::default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "defaults::default_ocr")]
    pub ocr: OcrConfig,

    #[serde(default = "defaults::default_chunking")]
    pub chunking: ChunkingConfig,

    #[serde(default = "defaults::default_embeddings")]
    pub embeddings: EmbeddingsConfig,

    #[serde(default = "defaults::default_workers")]
    pub workers: WorkersConfig,

    #[serde(default = "defaults::default_reconciler")]
    pub reconciler: ReconcilerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: defaults::default_server(),
            storage: defaults::default_storage(),
            ocr: defaults::default_ocr(),
            chunking: defaults::default_chunking(),
            embeddings: defaults::default_embeddings(),
            workers: defaults::default_workers(),
            reconciler: defaults::default_reconciler(),
        }
    }
}

/// Validated, immutable settings consumed by the pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub ocr: OcrSettings,
    pub chunking: ChunkingSettings,
    pub workers: WorkerSettings,
    pub reconciler: ReconcilerSettings,
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub enabled: bool,
    /// Languages joined for tesseract's `-l`, e.g. `eng+deu`
    pub languages: String,
    /// Non-empty, deduplicated, in configured order
    pub dpi_candidates: Vec<u32>,
    pub text_threshold: usize,
    pub max_pages: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerSettings {
    pub stale_after: Duration,
    /// `None` disables the periodic sweep
    pub interval: Option<Duration>,
}

impl AppConfig {
    /// Validate the raw sections into pipeline settings.
    pub fn validate(&self) -> ServiceResult<PipelineSettings> {
        Ok(PipelineSettings {
            ocr: validate_ocr(&self.ocr)?,
            chunking: validate_chunking(&self.chunking)?,
            workers: validate_workers(&self.workers)?,
            reconciler: validate_reconciler(&self.reconciler)?,
        })
    }
}

fn invalid(message: impl Into<String>) -> ServiceError {
    ServiceError::Config {
        message: message.into(),
    }
}

fn validate_ocr(ocr: &OcrConfig) -> ServiceResult<OcrSettings> {
    let requested = if ocr.dpi_candidates.is_empty() {
        vec![ocr.fallback_dpi]
    } else {
        ocr.dpi_candidates.clone()
    };

    let mut dpi_candidates = Vec::with_capacity(requested.len());
    for dpi in requested {
        if !DPI_RANGE.contains(&dpi) {
            return Err(invalid(format!(
                "ocr DPI {} outside {}..={}",
                dpi,
                DPI_RANGE.start(),
                DPI_RANGE.end()
            )));
        }
        if !dpi_candidates.contains(&dpi) {
            dpi_candidates.push(dpi);
        }
    }

    let languages: Vec<&str> = ocr
        .languages
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    if languages.is_empty() {
        return Err(invalid("ocr.languages must name at least one language"));
    }
    if let Some(bad) = languages
        .iter()
        .find(|l| !l.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
    {
        return Err(invalid(format!("invalid OCR language code '{}'", bad)));
    }

    if ocr.max_pages == Some(0) {
        return Err(invalid("ocr.max_pages must be at least 1 when set"));
    }

    Ok(OcrSettings {
        enabled: ocr.enabled,
        languages: languages.join("+"),
        dpi_candidates,
        text_threshold: ocr.text_threshold,
        max_pages: ocr.max_pages,
    })
}

fn validate_chunking(chunking: &ChunkingConfig) -> ServiceResult<ChunkingSettings> {
    if chunking.chunk_size == 0 {
        return Err(invalid("chunking.chunk_size must be positive"));
    }
    if chunking.chunk_overlap >= chunking.chunk_size {
        return Err(invalid(format!(
            "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
            chunking.chunk_overlap, chunking.chunk_size
        )));
    }
    Ok(ChunkingSettings {
        chunk_size: chunking.chunk_size,
        chunk_overlap: chunking.chunk_overlap,
    })
}

fn validate_workers(workers: &WorkersConfig) -> ServiceResult<WorkerSettings> {
    if workers.concurrency == 0 {
        return Err(invalid("workers.concurrency must be at least 1"));
    }
    if workers.max_attempts == 0 {
        return Err(invalid("workers.max_attempts must be at least 1"));
    }
    Ok(WorkerSettings {
        concurrency: workers.concurrency,
        max_attempts: workers.max_attempts,
        backoff_base: Duration::from_millis(workers.backoff_base_ms),
        poll_interval: Duration::from_millis(workers.poll_interval_ms.max(10)),
    })
}

fn validate_reconciler(reconciler: &ReconcilerConfig) -> ServiceResult<ReconcilerSettings> {
    if reconciler.stale_after_secs == 0 {
        return Err(invalid("reconciler.stale_after_secs must be at least 1"));
    }
    Ok(ReconcilerSettings {
        stale_after: Duration::from_secs(reconciler.stale_after_secs),
        interval: (reconciler.interval_secs > 0)
            .then(|| Duration::from_secs(reconciler.interval_secs)),
    })
}
