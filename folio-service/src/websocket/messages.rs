//! WebSocket message types.

use serde::{Deserialize, Serialize};

use crate::db::DocumentStatus;
use crate::queue::ProgressEvent;

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Receive live events for one owner's documents
    Subscribe { owner_id: String },
    Unsubscribe,
    Ping,
}

/// Normalized document event published to an owner's subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Progress {
        doc_id: String,
        status: DocumentStatus,
        pct: u8,
        stage: String,
        error: Option<String>,
    },
    Completed {
        doc_id: String,
        pages: Option<u32>,
    },
    Failed {
        doc_id: String,
        error: String,
    },
}

impl LiveEvent {
    pub fn doc_id(&self) -> &str {
        match self {
            LiveEvent::Progress { doc_id, .. }
            | LiveEvent::Completed { doc_id, .. }
            | LiveEvent::Failed { doc_id, .. } => doc_id,
        }
    }

    /// Wire name of the event, also used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            LiveEvent::Progress { .. } => "progress",
            LiveEvent::Completed { .. } => "completed",
            LiveEvent::Failed { .. } => "failed",
        }
    }
}

impl From<&ProgressEvent> for LiveEvent {
    fn from(event: &ProgressEvent) -> Self {
        LiveEvent::Progress {
            doc_id: event.doc_id.clone(),
            status: event.status,
            pct: event.pct,
            stage: event.stage.clone(),
            error: event.error.clone(),
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Subscribed {
        owner_id: String,
    },
    Unsubscribed,
    Pong {
        timestamp: u64,
    },
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
    Progress {
        doc_id: String,
        status: DocumentStatus,
        pct: u8,
        stage: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Completed {
        doc_id: String,
        status: DocumentStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        pages: Option<u32>,
    },
    Failed {
        doc_id: String,
        status: DocumentStatus,
        error: String,
    },
}

impl From<LiveEvent> for ServerMessage {
    fn from(event: LiveEvent) -> Self {
        match event {
            LiveEvent::Progress {
                doc_id,
                status,
                pct,
                stage,
                error,
            } => ServerMessage::Progress {
                doc_id,
                status,
                pct,
                stage,
                error,
            },
            LiveEvent::Completed { doc_id, pages } => ServerMessage::Completed {
                doc_id,
                status: DocumentStatus::Ready,
                pages,
            },
            LiveEvent::Failed { doc_id, error } => ServerMessage::Failed {
                doc_id,
                status: DocumentStatus::Error,
                error,
            },
        }
    }
}
