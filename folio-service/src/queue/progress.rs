//! Progress emission handed to job handlers.

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use super::types::{ProgressEvent, QueueEvent};
use crate::db::DocumentStatus;

/// Sends `progress` events for the running job
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    events: UnboundedSender<QueueEvent>,
}

impl ProgressReporter {
    pub fn new(events: UnboundedSender<QueueEvent>) -> Self {
        Self { events }
    }

    pub fn report(&self, event: ProgressEvent) {
        if self.events.send(QueueEvent::Progress(event)).is_err() {
            debug!("Queue event channel closed, dropping progress event");
        }
    }

    /// Report a `processing` step
    pub fn step(&self, owner_id: &str, doc_id: &str, pct: u8, stage: &str) {
        self.report(ProgressEvent {
            owner_id: owner_id.to_string(),
            doc_id: doc_id.to_string(),
            status: DocumentStatus::Processing,
            pct: pct.min(100),
            stage: stage.to_string(),
            error: None,
        });
    }
}
