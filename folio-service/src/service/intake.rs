//! Upload intake, listing and delete requests.

use chrono::Utc;
use tracing::{info, warn};

use super::FolioService;
use crate::blob::sha256_hex;
use crate::db::{Document, DocumentPatch, DocumentStatus};
use crate::error::{ServiceError, ServiceResult};
use crate::queue::{HardDeleteJob, IngestJob, JobPayload};

const PDF_MAGIC: &[u8] = b"%PDF-";

impl FolioService {
    /// Store an uploaded PDF, create its `queued` row and enqueue exactly one
    /// `file-ready` job.
    pub async fn accept_upload(
        &self,
        owner_id: &str,
        name: &str,
        content: &[u8],
    ) -> ServiceResult<Document> {
        if owner_id.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "owner id must not be empty".to_string(),
            });
        }
        if name.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "document name must not be empty".to_string(),
            });
        }
        if !content.starts_with(PDF_MAGIC) {
            return Err(ServiceError::InvalidRequest {
                message: "upload is not a PDF".to_string(),
            });
        }

        let doc_id = uuid::Uuid::new_v4().to_string();
        let blob_ref = format!("{}.pdf", uuid::Uuid::new_v4());
        self.blobs.put(&blob_ref, content).await?;

        let now = Utc::now();
        let document = Document {
            id: doc_id.clone(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            size_bytes: content.len() as u64,
            status: DocumentStatus::Queued,
            page_count: None,
            // Fresh per document, never derived from the id or name
            vector_collection: format!("doc_{}", uuid::Uuid::new_v4().simple()),
            blob_ref,
            content_hash: Some(sha256_hex(content)),
            stage: None,
            progress: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let payload = JobPayload::FileReady(IngestJob {
            doc_id: doc_id.clone(),
            owner_id: Some(owner_id.to_string()),
        });
        if let Err(e) = self.queue.enqueue_with_document(&document, &payload) {
            // Nothing references the blob without its row
            if let Err(cleanup) = self.blobs.delete(&document.blob_ref).await {
                warn!(blob_ref = %document.blob_ref, error = %cleanup, "Failed to remove orphaned upload blob");
            }
            return Err(e);
        }

        info!(
            doc_id = %doc_id,
            owner_id = %owner_id,
            name = %name,
            size_bytes = document.size_bytes,
            "Document uploaded and queued for ingestion"
        );
        Ok(document)
    }

    /// The owner's documents, after repairing any with lost completions
    pub async fn list_documents(&self, owner_id: &str) -> ServiceResult<Vec<Document>> {
        if let Err(e) = self.reconciler.reconcile(Some(owner_id)).await {
            warn!(owner_id = %owner_id, error = %e, "Inline reconciliation failed");
        }
        self.db.list_documents(owner_id)
    }

    /// Owner-scoped read; soft-deleted documents are not found
    pub fn get_document(&self, owner_id: &str, doc_id: &str) -> ServiceResult<Document> {
        self.db
            .find_document(doc_id)?
            .filter(|doc| doc.owner_id == owner_id && doc.status != DocumentStatus::Deleted)
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: doc_id.to_string(),
            })
    }

    /// Hide a document; its blob and vectors stay in place.
    pub fn soft_delete(&self, owner_id: &str, doc_id: &str) -> ServiceResult<Document> {
        let doc = self.get_document(owner_id, doc_id)?;
        self.transition(&doc, DocumentPatch::status(DocumentStatus::Deleted).with_deleted_at(Utc::now()))?;
        info!(doc_id = %doc_id, owner_id = %owner_id, "Document soft-deleted");
        self.get_document_any_status(doc_id)
    }

    /// Move the document to `deleting` and enqueue its cleanup. Returns the
    /// job id.
    pub fn request_hard_delete(&self, owner_id: &str, doc_id: &str) -> ServiceResult<String> {
        let doc = self
            .db
            .find_document(doc_id)?
            .filter(|doc| doc.owner_id == owner_id)
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: doc_id.to_string(),
            })?;
        self.transition(&doc, DocumentPatch::status(DocumentStatus::Deleting))?;

        let job_id = self.queue.enqueue(&JobPayload::HardDelete(HardDeleteJob {
            doc_id: doc.id.clone(),
            owner_id: doc.owner_id.clone(),
            blob_ref: doc.blob_ref.clone(),
            vector_collection_ref: doc.vector_collection.clone(),
        }))?;
        info!(doc_id = %doc_id, owner_id = %owner_id, job_id = %job_id, "Hard delete requested");
        Ok(job_id)
    }

    fn transition(&self, doc: &Document, patch: DocumentPatch) -> ServiceResult<()> {
        let to = patch.status.unwrap_or(doc.status);
        if self.db.update_document_status(&doc.id, &doc.owner_id, &patch)? {
            return Ok(());
        }
        // Report the status that blocked the update, which may be newer
        let from = self
            .db
            .find_document(&doc.id)?
            .map(|current| current.status)
            .unwrap_or(doc.status);
        Err(ServiceError::InvalidTransition {
            document_id: doc.id.clone(),
            from,
            to,
        })
    }

    fn get_document_any_status(&self, doc_id: &str) -> ServiceResult<Document> {
        self.db
            .find_document(doc_id)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: doc_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{JobKind, JobStatus};
    use crate::testing::Harness;
    use crate::vector_index::VectorIndex;

    const PDF: &[u8] = b"%PDF-1.7\n%fake body";

    #[tokio::test]
    async fn test_upload_creates_queued_row_and_one_job() {
        let harness = Harness::new();
        let service = harness.service();

        let doc = service.accept_upload("alice", "report.pdf", PDF).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Queued);
        assert_eq!(doc.size_bytes, PDF.len() as u64);
        assert_eq!(doc.content_hash.as_deref(), Some(sha256_hex(PDF).as_str()));
        assert!(harness.blobs.contains(&doc.blob_ref));

        let other = service.accept_upload("alice", "report.pdf", PDF).await.unwrap();
        assert_ne!(doc.vector_collection, other.vector_collection);

        let claimed = harness.db.claim_next_job(Utc::now()).unwrap().unwrap();
        assert_eq!(claimed.kind, JobKind::FileReady);
        let claimed_doc = claimed.payload["docId"].as_str().unwrap();
        assert!(claimed_doc == doc.id || claimed_doc == other.id);
        assert_eq!(
            harness.db.job_counts().unwrap().into_iter().map(|(_, n)| n).sum::<u64>(),
            2
        );
    }

    #[tokio::test]
    async fn test_failed_enqueue_leaves_no_row_or_blob() {
        let harness = Harness::new();
        let service = harness.service();
        harness.db.execute_batch("DROP TABLE jobs").unwrap();

        let result = service.accept_upload("alice", "report.pdf", PDF).await;
        assert!(matches!(result, Err(ServiceError::Database(_))));
        assert!(harness.db.list_documents("alice").unwrap().is_empty());
        assert!(harness.blobs.is_empty());
    }

    #[tokio::test]
    async fn test_upload_rejects_non_pdf() {
        let harness = Harness::new();
        let err = harness
            .service()
            .accept_upload("alice", "notes.txt", b"hello")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest { .. }));
        assert!(harness.db.list_documents("alice").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_soft_delete_hides_but_keeps_data() {
        let harness = Harness::new();
        let service = harness.service();
        let doc = service.accept_upload("alice", "a.pdf", PDF).await.unwrap();

        let deleted = service.soft_delete("alice", &doc.id).unwrap();
        assert_eq!(deleted.status, DocumentStatus::Deleted);
        assert!(deleted.deleted_at.is_some());
        assert!(harness.blobs.contains(&doc.blob_ref));

        assert!(service.list_documents("alice").await.unwrap().is_empty());
        assert!(matches!(
            service.get_document("alice", &doc.id),
            Err(ServiceError::DocumentNotFound { .. })
        ));
        assert!(matches!(
            service.request_hard_delete("alice", &doc.id),
            Err(ServiceError::InvalidTransition {
                from: DocumentStatus::Deleted,
                to: DocumentStatus::Deleting,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_hard_delete_request_snapshots_identifiers() {
        let harness = Harness::new();
        let service = harness.service();
        let doc = service.accept_upload("alice", "a.pdf", PDF).await.unwrap();
        // Drop the ingestion job so the next claim is the delete
        let ingest = harness.db.claim_next_job(Utc::now()).unwrap().unwrap();
        harness.db.complete_job(&ingest.id, &serde_json::json!({})).unwrap();

        assert!(matches!(
            service.request_hard_delete("mallory", &doc.id),
            Err(ServiceError::DocumentNotFound { .. })
        ));

        let job_id = service.request_hard_delete("alice", &doc.id).unwrap();
        assert_eq!(
            harness.db.find_document(&doc.id).unwrap().unwrap().status,
            DocumentStatus::Deleting
        );

        let job = harness.db.claim_next_job(Utc::now()).unwrap().unwrap();
        assert_eq!(job.id, job_id);
        assert_eq!(job.kind, JobKind::HardDelete);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(
            job.payload,
            serde_json::json!({
                "docId": doc.id,
                "ownerId": "alice",
                "blobRef": doc.blob_ref,
                "vectorCollectionRef": doc.vector_collection
            })
        );
    }

    #[tokio::test]
    async fn test_listing_reconciles_stale_documents() {
        let harness = Harness::new();
        let service = harness.service();
        let mut doc = crate::testing::sample_document("stale", "alice");
        doc.status = DocumentStatus::Processing;
        doc.created_at = Utc::now() - chrono::Duration::seconds(120);
        harness.db.insert_document(&doc).unwrap();
        harness
            .vectors
            .upsert(&doc.vector_collection, crate::testing::one_point(&doc))
            .await
            .unwrap();

        let listed = service.list_documents("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, DocumentStatus::Ready);
    }
}
