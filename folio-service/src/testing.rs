//! In-memory fakes and fixtures shared by unit tests.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::blob::{BlobStore, FetchedBlob, sha256_hex};
use crate::config::ReconcilerSettings;
use crate::db::{Database, Document, DocumentStatus};
use crate::embeddings::Embedder;
use crate::error::{
    DatabaseError, EmbeddingError, ProcessingError, ServiceError, ServiceResult,
};
use crate::ingestion::ExtractedPage;
use crate::ingestion::ocr::{OcrEngine, OcrPage};
use crate::ingestion::pdf::{PdfBackend, RasterizedPage};
use crate::queue::{JobQueue, RetryPolicy};
use crate::service::{FolioService, Reconciler, StatusRelay};
use crate::vector_index::{PointMetadata, SqliteVectorIndex, VectorIndex, VectorPoint};
use crate::websocket::{LiveEvent, LivePublisher};

/// A `queued` row with deterministic storage references
pub fn sample_document(id: &str, owner_id: &str) -> Document {
    let now = Utc::now();
    Document {
        id: id.to_string(),
        owner_id: owner_id.to_string(),
        name: format!("{}.pdf", id),
        size_bytes: 1024,
        status: DocumentStatus::Queued,
        page_count: None,
        vector_collection: format!("col-{}", id),
        blob_ref: format!("blob-{}", id),
        content_hash: None,
        stage: None,
        progress: None,
        last_error: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

/// A single indexed chunk for `doc`
pub fn one_point(doc: &Document) -> Vec<VectorPoint> {
    vec![VectorPoint {
        id: VectorPoint::point_id(&doc.id, 0),
        vector: vec![1.0, 0.0],
        text: "indexed text".to_string(),
        metadata: PointMetadata {
            page: 1,
            doc_id: doc.id.clone(),
            owner_id: doc.owner_id.clone(),
            ocr: false,
            chunk_index: 0,
        },
    }]
}

/// PDF backend with canned native text
pub struct FakePdf {
    native: Vec<String>,
    fail_rasterization: bool,
    unrenderable: Vec<u32>,
    rasterized: Mutex<Vec<u32>>,
}

impl FakePdf {
    /// One page per entry, with that native text
    pub fn native(pages: Vec<String>) -> Self {
        Self {
            native: pages,
            fail_rasterization: false,
            unrenderable: Vec::new(),
            rasterized: Mutex::new(Vec::new()),
        }
    }

    /// `pages` pages with no text layer
    pub fn scanned(pages: u32) -> Self {
        Self::native(vec![String::new(); pages as usize])
    }

    pub fn failing_rasterization(mut self) -> Self {
        self.fail_rasterization = true;
        self
    }

    /// Pages that `rasterize` silently skips, like a page PDFium fails to render
    pub fn unrenderable(mut self, pages: &[u32]) -> Self {
        self.unrenderable = pages.to_vec();
        self
    }

    /// DPIs passed to `rasterize`, in call order
    pub fn rasterized_dpis(&self) -> Vec<u32> {
        self.rasterized.lock().unwrap().clone()
    }
}

impl PdfBackend for FakePdf {
    fn extract_pages(&self, _path: &Path) -> ServiceResult<Vec<ExtractedPage>> {
        Ok(self
            .native
            .iter()
            .enumerate()
            .map(|(i, text)| ExtractedPage::native(i as u32 + 1, text.clone()))
            .collect())
    }

    fn rasterize(
        &self,
        _path: &Path,
        dpi: u32,
        max_pages: Option<u32>,
        out_dir: &Path,
    ) -> ServiceResult<Vec<RasterizedPage>> {
        self.rasterized.lock().unwrap().push(dpi);
        if self.fail_rasterization {
            return Err(ProcessingError::Rasterization {
                page: 1,
                dpi,
                message: "renderer crashed".to_string(),
            }
            .into());
        }

        let total = self.native.len() as u32;
        let count = max_pages.map_or(total, |max| max.min(total));
        (1..=count)
            .filter(|page_number| !self.unrenderable.contains(page_number))
            .map(|page_number| {
                let image_path = out_dir.join(format!("page-{}-dpi-{}.png", page_number, dpi));
                std::fs::write(&image_path, b"png").map_err(ProcessingError::Io)?;
                Ok(RasterizedPage {
                    page_number,
                    image_path,
                })
            })
            .collect()
    }
}

/// OCR engine that answers per DPI, read back from the image file name
#[derive(Default)]
pub struct FakeOcr {
    by_dpi: DashMap<u32, (String, Option<f32>)>,
    calls: Mutex<usize>,
}

impl FakeOcr {
    pub fn with_dpi(self, dpi: u32, text: &str, confidence: Option<f32>) -> Self {
        self.by_dpi.insert(dpi, (text.to_string(), confidence));
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl OcrEngine for FakeOcr {
    async fn recognize(&self, image: &Path, _languages: &str) -> ServiceResult<OcrPage> {
        *self.calls.lock().unwrap() += 1;
        let dpi = image
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.rsplit("-dpi-").next())
            .and_then(|dpi| dpi.parse::<u32>().ok());

        let page = match dpi.and_then(|dpi| self.by_dpi.get(&dpi)) {
            Some(entry) => OcrPage {
                text: entry.0.clone(),
                confidence: entry.1,
            },
            None => OcrPage {
                text: String::new(),
                confidence: None,
            },
        };
        Ok(page)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum EmbedMode {
    #[default]
    Normal,
    Failing,
    ShortByOne,
}

/// Embedder producing small deterministic vectors
#[derive(Default)]
pub struct FakeEmbedder {
    mode: EmbedMode,
}

impl FakeEmbedder {
    /// Every call fails with a retryable error
    pub fn failing() -> Self {
        Self {
            mode: EmbedMode::Failing,
        }
    }

    /// Returns one vector fewer than requested
    pub fn short_by_one() -> Self {
        Self {
            mode: EmbedMode::ShortByOne,
        }
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> ServiceResult<Vec<Vec<f32>>> {
        if self.mode == EmbedMode::Failing {
            return Err(EmbeddingError::Http {
                status: 503,
                message: "model loading".to_string(),
            }
            .into());
        }

        let mut vectors: Vec<Vec<f32>> = texts
            .iter()
            .map(|text| vec![text.len() as f32, 1.0])
            .collect();
        if self.mode == EmbedMode::ShortByOne {
            vectors.pop();
        }
        Ok(vectors)
    }

    async fn health_check(&self) -> bool {
        self.mode != EmbedMode::Failing
    }
}

/// Blob store held in memory
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn contains(&self, blob_ref: &str) -> bool {
        self.blobs.contains_key(blob_ref)
    }

    pub fn remove(&self, blob_ref: &str) {
        self.blobs.remove(blob_ref);
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, blob_ref: &str, bytes: &[u8]) -> ServiceResult<()> {
        self.blobs.insert(blob_ref.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn fetch_to(&self, blob_ref: &str, dest: &Path) -> ServiceResult<FetchedBlob> {
        let bytes = self
            .blobs
            .get(blob_ref)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceError::BlobUnavailable {
                blob_ref: blob_ref.to_string(),
                message: "no such blob".to_string(),
            })?;
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(ProcessingError::Io)?;
        Ok(FetchedBlob {
            size_bytes: bytes.len() as u64,
            sha256: sha256_hex(&bytes),
        })
    }

    async fn delete(&self, blob_ref: &str) -> ServiceResult<bool> {
        Ok(self.blobs.remove(blob_ref).is_some())
    }
}

/// Vector index whose every operation fails
pub struct BrokenVectorIndex;

fn broken(collection: &str) -> ServiceError {
    ServiceError::IndexWriteFailed {
        collection: collection.to_string(),
        source: DatabaseError::Migration {
            message: "index offline".to_string(),
        },
    }
}

#[async_trait]
impl VectorIndex for BrokenVectorIndex {
    async fn upsert(&self, collection: &str, _points: Vec<VectorPoint>) -> ServiceResult<usize> {
        Err(broken(collection))
    }

    async fn point_count(&self, collection: &str) -> ServiceResult<u64> {
        Err(broken(collection))
    }

    async fn drop_collection(&self, collection: &str) -> ServiceResult<bool> {
        Err(broken(collection))
    }
}

/// Live publisher that records what it was asked to send
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(String, LiveEvent)>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<(String, LiveEvent)> {
        self.events.lock().unwrap().clone()
    }
}

impl LivePublisher for RecordingPublisher {
    fn publish(&self, owner_id: &str, event: LiveEvent) -> usize {
        self.events
            .lock()
            .unwrap()
            .push((owner_id.to_string(), event));
        1
    }
}

/// Database, blob store, vector index and scratch space for one test
pub struct Harness {
    pub db: Arc<Database>,
    pub blobs: Arc<MemoryBlobStore>,
    pub vectors: Arc<SqliteVectorIndex>,
    pub scratch: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            db: Arc::new(Database::open_in_memory().unwrap()),
            blobs: Arc::new(MemoryBlobStore::default()),
            vectors: Arc::new(SqliteVectorIndex::open_in_memory().unwrap()),
            scratch: TempDir::new().unwrap(),
        }
    }

    /// Insert a `queued` document whose blob exists and matches its hash
    pub async fn insert_document(&self, id: &str, owner_id: &str) -> Document {
        let bytes = format!("%PDF-1.7 {}", id).into_bytes();
        let mut doc = sample_document(id, owner_id);
        doc.size_bytes = bytes.len() as u64;
        doc.content_hash = Some(sha256_hex(&bytes));
        self.blobs.put(&doc.blob_ref, &bytes).await.unwrap();
        self.db.insert_document(&doc).unwrap();
        doc
    }

    /// Service over this harness. Queue events go nowhere.
    pub fn service(&self) -> FolioService {
        let (tx, _rx) = mpsc::unbounded_channel();
        let queue = Arc::new(JobQueue::new(self.db.clone(), RetryPolicy::default(), tx));
        let relay = Arc::new(StatusRelay::new(
            self.db.clone(),
            Arc::new(RecordingPublisher::default()),
        ));
        let reconciler = Arc::new(Reconciler::new(
            self.db.clone(),
            self.vectors.clone(),
            relay,
            ReconcilerSettings {
                stale_after: Duration::from_secs(20),
                interval: None,
            },
        ));
        FolioService::new(self.db.clone(), self.blobs.clone(), queue, reconciler)
    }
}
