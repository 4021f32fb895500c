//! Ingestion worker for `file-ready` jobs.
//!
//! Every attempt starts from the top: fetch the blob into a fresh scratch
//! directory, extract native text, fall back to OCR when the text layer is
//! too thin, chunk, embed and overwrite the document's own collection.
//! Re-running a job is wasteful but never corrupting, which is what the
//! at-least-once queue relies on.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::blob::BlobStore;
use crate::config::{ChunkingSettings, OcrSettings};
use crate::db::{Database, Document, DocumentPatch, DocumentStatus};
use crate::embeddings::Embedder;
use crate::error::{ProcessingError, ServiceError, ServiceResult, format_error_chain};
use crate::ingestion::{
    Chunk, Chunker, ExtractedPage, OcrEngine, OcrFallback, OcrOutcome, PdfBackend, needs_ocr,
};
use crate::queue::{IngestJob, ProgressEvent, ProgressReporter};
use crate::vector_index::{PointMetadata, VectorIndex, VectorPoint};

/// Progress checkpoints, in pipeline order
pub mod stage {
    pub const START: (&str, u8) = ("start", 0);
    pub const DOWNLOAD: (&str, u8) = ("download", 10);
    pub const PDF_PARSE: (&str, u8) = ("pdf-parse", 25);
    pub const OCR: (&str, u8) = ("ocr", 40);
    pub const CHUNKING: (&str, u8) = ("chunking", 60);
    pub const INDEXING: (&str, u8) = ("indexing", 80);
    pub const COMPLETED: (&str, u8) = ("completed", 100);
    pub const FAILED: &str = "failed";
    pub const RETRYING: &str = "retrying";
}

/// Result payload of a successful ingestion.
///
/// Carries `ownerId`/`docId` so the status relay knows which document and
/// live channel the completion belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub owner_id: String,
    pub doc_id: String,
    pub pages: u32,
    pub chunks: usize,
    pub ocr: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_dpi: Option<u32>,
}

/// What an ingestion attempt did
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Indexed(IngestReport),
    /// Nothing was done to the document
    Skipped { reason: String },
}

impl IngestOutcome {
    /// Job result stored by the queue. Skips carry no ids, so the relay
    /// never mistakes them for a completed ingestion.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            IngestOutcome::Indexed(report) => serde_json::to_value(report)
                .unwrap_or_else(|_| serde_json::json!({ "docId": report.doc_id })),
            IngestOutcome::Skipped { reason } => {
                serde_json::json!({ "skipped": true, "reason": reason })
            }
        }
    }
}

/// Collaborators and settings for ingestion
pub struct IngestionWorker {
    db: Arc<Database>,
    blobs: Arc<dyn BlobStore>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    pdf: Arc<dyn PdfBackend>,
    fallback: OcrFallback,
    ocr: OcrSettings,
    chunker: Chunker,
    scratch_root: PathBuf,
}

/// Identifies the document an attempt is working on
struct Target<'a> {
    doc: &'a Document,
    owner_id: &'a str,
    progress: &'a ProgressReporter,
}

impl Target<'_> {
    fn step(&self, (stage, pct): (&str, u8)) {
        self.progress.step(self.owner_id, &self.doc.id, pct, stage);
    }
}

impl IngestionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        blobs: Arc<dyn BlobStore>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        pdf: Arc<dyn PdfBackend>,
        ocr_engine: Arc<dyn OcrEngine>,
        ocr: OcrSettings,
        chunking: ChunkingSettings,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fallback: OcrFallback::new(Arc::clone(&pdf), ocr_engine, ocr.clone()),
            db,
            blobs,
            vectors,
            embedder,
            pdf,
            ocr,
            chunker: Chunker::new(chunking),
            scratch_root: scratch_root.into(),
        }
    }

    /// Run one attempt of `job`.
    ///
    /// On failure the document is marked `error` when the failure is
    /// terminal or `final_attempt` is set; otherwise it stays `processing`
    /// and the queue retries. The error is returned either way.
    pub async fn run(
        &self,
        job: &IngestJob,
        final_attempt: bool,
        progress: &ProgressReporter,
    ) -> ServiceResult<IngestOutcome> {
        let Some(doc) = self.db.find_document(&job.doc_id)? else {
            warn!(doc_id = %job.doc_id, "Document row missing, ingestion cannot proceed");
            return Err(ServiceError::DocumentNotFound {
                document_id: job.doc_id.clone(),
            });
        };

        let owner_id = job.owner_id.as_deref().unwrap_or(&doc.owner_id);
        if owner_id != doc.owner_id {
            warn!(
                doc_id = %doc.id,
                job_owner = %owner_id,
                row_owner = %doc.owner_id,
                "Ingestion job owner does not match document, skipping"
            );
            return Ok(IngestOutcome::Skipped {
                reason: ServiceError::OwnershipMismatch {
                    document_id: doc.id.clone(),
                    owner_id: owner_id.to_string(),
                }
                .to_string(),
            });
        }

        match doc.status {
            DocumentStatus::Deleted | DocumentStatus::Deleting | DocumentStatus::Error => {
                info!(doc_id = %doc.id, status = %doc.status, "Document no longer ingestible, skipping");
                return Ok(IngestOutcome::Skipped {
                    reason: format!("document is {}", doc.status),
                });
            }
            DocumentStatus::Ready => {
                debug!(doc_id = %doc.id, "Re-ingesting ready document after redelivery");
            }
            DocumentStatus::Queued | DocumentStatus::Processing => {
                let patch = DocumentPatch::status(DocumentStatus::Processing)
                    .with_progress(stage::START.0, stage::START.1);
                if !self.db.update_document_status(&doc.id, owner_id, &patch)? {
                    return Ok(IngestOutcome::Skipped {
                        reason: "document changed status before processing started".to_string(),
                    });
                }
            }
        }

        let target = Target {
            doc: &doc,
            owner_id,
            progress,
        };
        target.step(stage::START);

        let started = Instant::now();
        info!(doc_id = %doc.id, owner_id = %owner_id, name = %doc.name, "Ingesting document");

        match self.process(&target).await {
            Ok(outcome) => {
                metrics::histogram!("folio_ingestion_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                Ok(outcome)
            }
            Err(e) => {
                self.record_failure(&target, &e, final_attempt);
                Err(e)
            }
        }
    }

    async fn process(&self, target: &Target<'_>) -> ServiceResult<IngestOutcome> {
        let doc = target.doc;

        // Dropped on every exit path, taking the PDF and OCR images with it
        let scratch = TempDir::with_prefix_in(format!("ingest-{}-", doc.id), &self.scratch_root)
            .map_err(ProcessingError::Io)?;
        let pdf_path = scratch.path().join("source.pdf");

        target.step(stage::DOWNLOAD);
        self.download(doc, target.owner_id, &pdf_path).await?;

        target.step(stage::PDF_PARSE);
        let native = self.extract(&pdf_path).await?;
        let page_count = native.len() as u32;
        debug!(
            doc_id = %doc.id,
            pages = page_count,
            text_len = crate::ingestion::total_text_len(&native),
            "Native extraction finished"
        );

        let (pages, ocr_dpi) = if needs_ocr(&self.ocr, &native) {
            target.step(stage::OCR);
            let outcome = self.fallback.run(&pdf_path, scratch.path(), &native).await;
            let dpi = match &outcome {
                OcrOutcome::UseOcr { dpi, .. } => Some(*dpi),
                _ => None,
            };
            (outcome.apply(native), dpi)
        } else {
            (native, None)
        };

        target.step(stage::CHUNKING);
        let chunks = self.chunker.split(&pages);
        if chunks.is_empty() {
            return Err(ServiceError::NoChunks {
                document_id: doc.id.clone(),
            });
        }

        target.step(stage::INDEXING);
        let indexed = self.index(doc, target.owner_id, &chunks).await?;

        let patch = DocumentPatch::status(DocumentStatus::Ready)
            .with_page_count(page_count)
            .with_progress(stage::COMPLETED.0, stage::COMPLETED.1)
            .clear_error();
        if !self
            .db
            .update_document_status(&doc.id, target.owner_id, &patch)?
        {
            return self.abandon_after_index(doc).await;
        }

        info!(
            doc_id = %doc.id,
            pages = page_count,
            chunks = indexed,
            ocr = ocr_dpi.is_some(),
            "Document ready"
        );
        Ok(IngestOutcome::Indexed(IngestReport {
            owner_id: target.owner_id.to_string(),
            doc_id: doc.id.clone(),
            pages: page_count,
            chunks: indexed,
            ocr: ocr_dpi.is_some(),
            ocr_dpi,
        }))
    }

    async fn download(&self, doc: &Document, owner_id: &str, dest: &Path) -> ServiceResult<()> {
        let fetched = self.blobs.fetch_to(&doc.blob_ref, dest).await?;

        match &doc.content_hash {
            Some(expected) if *expected != fetched.sha256 => {
                return Err(ServiceError::ContentHashMismatch {
                    blob_ref: doc.blob_ref.clone(),
                    expected: expected.clone(),
                    actual: fetched.sha256,
                });
            }
            Some(_) => {}
            None => {
                let patch = DocumentPatch::default().with_content_hash(&fetched.sha256);
                if let Err(e) = self.db.update_document_status(&doc.id, owner_id, &patch) {
                    warn!(doc_id = %doc.id, error = %e, "Failed to record content hash");
                }
            }
        }

        debug!(doc_id = %doc.id, size_bytes = fetched.size_bytes, "Blob fetched");
        Ok(())
    }

    async fn extract(&self, pdf_path: &Path) -> ServiceResult<Vec<ExtractedPage>> {
        let pdf = Arc::clone(&self.pdf);
        let path = pdf_path.to_path_buf();
        tokio::task::spawn_blocking(move || pdf.extract_pages(&path))
            .await
            .map_err(|e| ServiceError::Internal {
                message: format!("text extraction task failed: {}", e),
            })?
    }

    async fn index(&self, doc: &Document, owner_id: &str, chunks: &[Chunk]) -> ServiceResult<usize> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(ServiceError::EmbeddingMismatch {
                chunks: chunks.len(),
                embeddings: embeddings.len(),
            });
        }

        let points: Vec<VectorPoint> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, vector)| VectorPoint {
                id: VectorPoint::point_id(&doc.id, chunk.chunk_index),
                vector,
                text: chunk.text.clone(),
                metadata: PointMetadata {
                    page: chunk.page_number,
                    doc_id: doc.id.clone(),
                    owner_id: owner_id.to_string(),
                    ocr: chunk.source == crate::ingestion::TextSource::Ocr,
                    chunk_index: chunk.chunk_index,
                },
            })
            .collect();

        let written = self.vectors.upsert(&doc.vector_collection, points).await?;
        metrics::counter!("folio_chunks_indexed_total").increment(written as u64);
        Ok(written)
    }

    /// The document was deleted while this attempt ran. A hard delete may
    /// already have dropped the collection, so drop what was just written.
    async fn abandon_after_index(&self, doc: &Document) -> ServiceResult<IngestOutcome> {
        let current = self.db.find_document(&doc.id)?;
        let status = current.as_ref().map(|d| d.status);
        if matches!(status, None | Some(DocumentStatus::Deleting)) {
            if let Err(e) = self.vectors.drop_collection(&doc.vector_collection).await {
                warn!(doc_id = %doc.id, error = %e, "Failed to drop collection of deleted document");
            }
        }
        info!(doc_id = %doc.id, status = ?status, "Document removed during ingestion, result discarded");
        Ok(IngestOutcome::Skipped {
            reason: "document removed during ingestion".to_string(),
        })
    }

    fn record_failure(&self, target: &Target<'_>, e: &ServiceError, final_attempt: bool) {
        let doc = target.doc;
        let message = format_error_chain(e);

        if e.is_retryable() && !final_attempt {
            warn!(doc_id = %doc.id, error = %message, "Ingestion attempt failed, will retry");
            target.progress.report(ProgressEvent {
                owner_id: target.owner_id.to_string(),
                doc_id: doc.id.clone(),
                status: DocumentStatus::Processing,
                pct: 0,
                stage: stage::RETRYING.to_string(),
                error: Some(message),
            });
            return;
        }

        error!(
            doc_id = %doc.id,
            code = e.error_code(),
            error = %message,
            "Ingestion failed"
        );
        let patch = DocumentPatch::status(DocumentStatus::Error)
            .with_progress(stage::FAILED, 100)
            .with_error(&message);
        match self.db.update_document_status(&doc.id, target.owner_id, &patch) {
            Ok(true) => {}
            Ok(false) => debug!(doc_id = %doc.id, "Document left its processing state, error not recorded"),
            Err(db_err) => warn!(doc_id = %doc.id, error = %db_err, "Failed to record ingestion error"),
        }
        target.progress.report(ProgressEvent {
            owner_id: target.owner_id.to_string(),
            doc_id: doc.id.clone(),
            status: DocumentStatus::Error,
            pct: 100,
            stage: stage::FAILED.to_string(),
            error: Some(message),
        });
    }
}
