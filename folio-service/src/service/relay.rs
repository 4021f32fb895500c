//! Status relay: persists queue events onto the document row and forwards
//! them to the owner's live subscribers.
//!
//! `progress` persistence is best effort. `completed` and `failed` are
//! authoritative and terminal: once one has been seen for a document, later
//! `progress` events for it are dropped, since the transport may deliver
//! them out of order.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ingest::IngestReport;
use crate::db::{Database, DocumentPatch, DocumentStatus};
use crate::queue::{JobPayload, ProgressEvent, QueueEvent};
use crate::websocket::{LiveEvent, LivePublisher};

/// How long a terminal marker suppresses late progress events
const TERMINAL_TTL: Duration = Duration::from_secs(600);

pub struct StatusRelay {
    db: Arc<Database>,
    live: Arc<dyn LivePublisher>,
    /// doc_id -> when its terminal event was seen
    terminal: DashMap<String, Instant>,
}

impl StatusRelay {
    pub fn new(db: Arc<Database>, live: Arc<dyn LivePublisher>) -> Self {
        Self {
            db,
            live,
            terminal: DashMap::new(),
        }
    }

    /// Consume queue events until the channel closes or `shutdown` fires.
    /// Events already queued at shutdown are still handled.
    pub async fn run(self: Arc<Self>, mut events: UnboundedReceiver<QueueEvent>, shutdown: CancellationToken) {
        info!("Status relay started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }

        let mut drained = 0usize;
        while let Ok(event) = events.try_recv() {
            self.handle(event);
            drained += 1;
        }
        info!(drained, "Status relay stopped");
    }

    pub fn handle(&self, event: QueueEvent) {
        match event {
            QueueEvent::Progress(progress) => self.on_progress(&progress),
            QueueEvent::Completed { job_id, kind, result } => {
                match serde_json::from_value::<IngestReport>(result) {
                    Ok(report) => self.on_completed(&report.owner_id, &report.doc_id, Some(report.pages)),
                    // Hard deletes and skipped ingestions carry no ids
                    Err(_) => debug!(job_id = %job_id, %kind, "Completion without document ids, not relayed"),
                }
            }
            QueueEvent::Failed {
                job_id,
                payload,
                reason,
            } => match payload {
                JobPayload::FileReady(job) => {
                    let owner_id = match job.owner_id {
                        Some(owner) => Some(owner),
                        None => self
                            .db
                            .find_document(&job.doc_id)
                            .ok()
                            .flatten()
                            .map(|doc| doc.owner_id),
                    };
                    match owner_id {
                        Some(owner_id) => self.on_failed(&owner_id, &job.doc_id, &reason),
                        None => warn!(job_id = %job_id, doc_id = %job.doc_id, "Failed ingestion for unknown document"),
                    }
                }
                JobPayload::HardDelete(job) => {
                    warn!(job_id = %job_id, doc_id = %job.doc_id, error = %reason, "Hard delete failed permanently");
                }
            },
        }
    }

    fn on_progress(&self, event: &ProgressEvent) {
        if self.is_terminal(&event.doc_id) {
            debug!(doc_id = %event.doc_id, stage = %event.stage, "Ignoring progress after terminal event");
            return;
        }

        let mut patch = DocumentPatch::status(event.status).with_progress(&event.stage, event.pct);
        if let Some(error) = &event.error {
            if event.status == DocumentStatus::Error {
                patch = patch.with_error(error);
            }
        }
        match self.db.update_document_status(&event.doc_id, &event.owner_id, &patch) {
            Ok(true) => {}
            Ok(false) => debug!(doc_id = %event.doc_id, status = %event.status, "Progress not persisted, status moved on"),
            Err(e) => warn!(doc_id = %event.doc_id, error = %e, "Failed to persist progress"),
        }

        self.live.publish(&event.owner_id, LiveEvent::from(event));
    }

    fn on_completed(&self, owner_id: &str, doc_id: &str, pages: Option<u32>) {
        let mut patch = DocumentPatch::status(DocumentStatus::Ready).with_progress("completed", 100);
        if let Some(pages) = pages {
            patch = patch.with_page_count(pages);
        }
        match self.db.update_document_status(doc_id, owner_id, &patch) {
            Ok(true) => {}
            Ok(false) => {
                info!(doc_id, "Completion not persisted, document no longer processing");
                return;
            }
            Err(e) => warn!(doc_id, error = %e, "Failed to persist completion"),
        }
        self.announce_completed(owner_id, doc_id, pages);
    }

    fn on_failed(&self, owner_id: &str, doc_id: &str, reason: &str) {
        let patch = DocumentPatch::status(DocumentStatus::Error)
            .with_progress("failed", 100)
            .with_error(reason);
        match self.db.update_document_status(doc_id, owner_id, &patch) {
            Ok(true) => {}
            Ok(false) => {
                info!(doc_id, "Failure not persisted, document no longer processing");
                return;
            }
            Err(e) => warn!(doc_id, error = %e, "Failed to persist failure"),
        }

        self.mark_terminal(doc_id);
        self.live.publish(
            owner_id,
            LiveEvent::Failed {
                doc_id: doc_id.to_string(),
                error: reason.to_string(),
            },
        );
    }

    /// Forward a `completed` event for a document already persisted as
    /// `ready`. Used by the reconciler after repairing a stuck document.
    pub fn announce_completed(&self, owner_id: &str, doc_id: &str, pages: Option<u32>) {
        self.mark_terminal(doc_id);
        self.live.publish(
            owner_id,
            LiveEvent::Completed {
                doc_id: doc_id.to_string(),
                pages,
            },
        );
    }

    fn mark_terminal(&self, doc_id: &str) {
        self.terminal
            .retain(|_, seen| seen.elapsed() < TERMINAL_TTL);
        self.terminal.insert(doc_id.to_string(), Instant::now());
    }

    fn is_terminal(&self, doc_id: &str) -> bool {
        self.terminal
            .get(doc_id)
            .is_some_and(|seen| seen.elapsed() < TERMINAL_TTL)
    }
}
