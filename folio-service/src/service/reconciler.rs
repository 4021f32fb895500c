//! Repairs documents whose completion event was lost.
//!
//! A document stuck in `queued`/`processing` past the staleness window is
//! checked against its vector collection. Any indexed point is taken as
//! proof the ingestion finished: the row is flipped to `ready` and a
//! `completed` event is announced. An empty collection leaves the row alone;
//! the job queue's retries decide that case. This never marks `error`.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::relay::StatusRelay;
use crate::config::ReconcilerSettings;
use crate::db::{Database, Document, DocumentPatch, DocumentStatus};
use crate::error::ServiceResult;
use crate::vector_index::VectorIndex;

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub repaired: usize,
}

pub struct Reconciler {
    db: Arc<Database>,
    vectors: Arc<dyn VectorIndex>,
    relay: Arc<StatusRelay>,
    stale_after: Duration,
}

impl Reconciler {
    pub fn new(
        db: Arc<Database>,
        vectors: Arc<dyn VectorIndex>,
        relay: Arc<StatusRelay>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            db,
            vectors,
            relay,
            stale_after: settings.stale_after,
        }
    }

    /// Check stale documents, optionally limited to one owner.
    pub async fn reconcile(&self, owner_id: Option<&str>) -> ServiceResult<ReconcileReport> {
        let stale_after =
            chrono::Duration::from_std(self.stale_after).unwrap_or(chrono::Duration::seconds(20));
        let older_than = Utc::now() - stale_after;
        let stale = self.db.list_stale_documents(owner_id, older_than)?;

        let mut report = ReconcileReport {
            checked: stale.len(),
            ..Default::default()
        };
        for doc in stale {
            let points = match self.vectors.point_count(&doc.vector_collection).await {
                Ok(points) => points,
                Err(e) => {
                    warn!(doc_id = %doc.id, error = %e, "Could not count points for stale document");
                    continue;
                }
            };
            if points == 0 {
                debug!(doc_id = %doc.id, status = %doc.status, "Stale document has no points, leaving as is");
                continue;
            }

            match self.mark_ready(&doc) {
                Ok(true) => {
                    report.repaired += 1;
                    metrics::counter!("folio_reconciler_repairs_total").increment(1);
                    info!(doc_id = %doc.id, points, "Repaired document with lost completion");
                    self.relay
                        .announce_completed(&doc.owner_id, &doc.id, doc.page_count);
                }
                Ok(false) => debug!(doc_id = %doc.id, "Document moved on during reconciliation"),
                Err(e) => warn!(doc_id = %doc.id, error = %e, "Failed to repair stale document"),
            }
        }

        Ok(report)
    }

    /// `ready` is only reachable from `processing`, so a `queued` row goes
    /// through it first.
    fn mark_ready(&self, doc: &Document) -> ServiceResult<bool> {
        if doc.status == DocumentStatus::Queued {
            let patch = DocumentPatch::status(DocumentStatus::Processing);
            if !self.db.update_document_status(&doc.id, &doc.owner_id, &patch)? {
                return Ok(false);
            }
        }
        let patch = DocumentPatch::status(DocumentStatus::Ready)
            .with_progress("completed", 100)
            .clear_error();
        self.db.update_document_status(&doc.id, &doc.owner_id, &patch)
    }

    /// Sweep all owners every `interval` until `shutdown` fires.
    pub fn spawn_periodic(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Periodic reconciler started");
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match self.reconcile(None).await {
                    Ok(report) if report.repaired > 0 => {
                        info!(checked = report.checked, repaired = report.repaired, "Reconciliation pass finished");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Reconciliation pass failed"),
                }
            }
            info!("Periodic reconciler stopped");
        })
    }
}
