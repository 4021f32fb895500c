//! Hard-delete worker for `hard-delete` jobs.
//!
//! Removes the vector collection, the blob and the document row. The three
//! steps run independently: one failing does not stop the others, and each
//! outcome is reported on its own.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::blob::BlobStore;
use crate::db::Database;
use crate::error::{ServiceError, ServiceResult, format_error_chain};
use crate::queue::HardDeleteJob;
use crate::vector_index::VectorIndex;

/// Outcome of one cleanup step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CleanupStep {
    Removed,
    /// Nothing was there to remove
    Missing,
    Failed { error: String },
}

impl CleanupStep {
    fn from_result(step: &str, doc_id: &str, result: ServiceResult<bool>) -> Self {
        match result {
            Ok(true) => CleanupStep::Removed,
            Ok(false) => {
                info!(doc_id, step, "Nothing to remove");
                CleanupStep::Missing
            }
            Err(e) => {
                let error = format_error_chain(&e);
                warn!(doc_id, step, error = %error, "Cleanup step failed");
                CleanupStep::Failed { error }
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CleanupStep::Failed { .. })
    }
}

/// What a hard-delete attempt did.
///
/// Serialized without `ownerId`/`docId`, so a delete completion can never be
/// read as an ingestion completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HardDeleteOutcome {
    Skipped {
        skipped: bool,
        reason: String,
    },
    Deleted {
        deleted: bool,
        collection: CleanupStep,
        blob: CleanupStep,
        record: CleanupStep,
    },
}

impl HardDeleteOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        HardDeleteOutcome::Skipped {
            skipped: true,
            reason: reason.into(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, HardDeleteOutcome::Skipped { .. })
    }
}

pub struct HardDeleteWorker {
    db: Arc<Database>,
    blobs: Arc<dyn BlobStore>,
    vectors: Arc<dyn VectorIndex>,
}

impl HardDeleteWorker {
    pub fn new(db: Arc<Database>, blobs: Arc<dyn BlobStore>, vectors: Arc<dyn VectorIndex>) -> Self {
        Self { db, blobs, vectors }
    }

    /// Run one attempt of `job`.
    ///
    /// Only a failure to remove the row is returned as an error, after the
    /// other two steps have been tried; the queue's retry then repeats the
    /// whole cleanup, which is safe because every step is idempotent.
    pub async fn run(&self, job: &HardDeleteJob) -> ServiceResult<HardDeleteOutcome> {
        let Some(doc) = self.db.find_document(&job.doc_id)? else {
            info!(doc_id = %job.doc_id, "Document already removed, skipping hard delete");
            return Ok(HardDeleteOutcome::skipped("document not found"));
        };
        if doc.owner_id != job.owner_id {
            let mismatch = ServiceError::OwnershipMismatch {
                document_id: job.doc_id.clone(),
                owner_id: job.owner_id.clone(),
            };
            warn!(doc_id = %job.doc_id, error = %mismatch, "Skipping hard delete");
            return Ok(HardDeleteOutcome::skipped(mismatch.to_string()));
        }

        let doc_id = job.doc_id.as_str();
        let collection = CleanupStep::from_result(
            "collection",
            doc_id,
            self.vectors.drop_collection(&job.vector_collection_ref).await,
        );
        let blob = CleanupStep::from_result("blob", doc_id, self.blobs.delete(&job.blob_ref).await);
        let record = match self.db.delete_document(doc_id, &job.owner_id) {
            Ok(removed) => CleanupStep::from_result("record", doc_id, Ok(removed)),
            Err(e) => {
                warn!(doc_id, error = %e, "Failed to remove document row, hard delete will be retried");
                return Err(e);
            }
        };

        info!(
            doc_id,
            collection = ?collection,
            blob = ?blob,
            record = ?record,
            "Hard delete finished"
        );
        Ok(HardDeleteOutcome::Deleted {
            deleted: true,
            collection,
            blob,
            record,
        })
    }
}
