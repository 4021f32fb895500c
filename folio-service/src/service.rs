//! Document pipeline services.
//!
//! - `intake`: uploads, listing and delete requests ([`FolioService`])
//! - `ingest`: the `file-ready` worker
//! - `hard_delete`: the `hard-delete` worker
//! - `jobs`: routes claimed jobs to the two workers
//! - `relay`: persists queue events and forwards them to live subscribers
//! - `reconciler`: repairs documents whose completion was lost

mod hard_delete;
mod ingest;
mod intake;
mod jobs;
mod reconciler;
mod relay;

pub use hard_delete::{CleanupStep, HardDeleteOutcome, HardDeleteWorker};
pub use ingest::{IngestOutcome, IngestReport, IngestionWorker};
pub use jobs::JobDispatcher;
pub use reconciler::{ReconcileReport, Reconciler};
pub use relay::StatusRelay;

use std::sync::Arc;

use crate::blob::BlobStore;
use crate::db::Database;
use crate::queue::JobQueue;

/// Entry point for document operations
pub struct FolioService {
    pub db: Arc<Database>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<JobQueue>,
    reconciler: Arc<Reconciler>,
}

impl FolioService {
    pub fn new(
        db: Arc<Database>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<JobQueue>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            db,
            blobs,
            queue,
            reconciler,
        }
    }
}
