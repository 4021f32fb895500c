//! Database model structs.
//!
//! This module contains the data structures for database records.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{Display, EnumString};

use super::parse_timestamp;

/// Lifecycle status of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Uploaded, waiting for the ingestion worker
    Queued,
    /// Ingestion attempt in progress
    Processing,
    /// Indexed and searchable
    Ready,
    /// Ingestion failed terminally; see `last_error`
    Error,
    /// Soft-deleted: hidden, blob and vectors untouched
    Deleted,
    /// Hard delete requested; the row disappears once cleanup runs
    Deleting,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 6] = [
        DocumentStatus::Queued,
        DocumentStatus::Processing,
        DocumentStatus::Ready,
        DocumentStatus::Error,
        DocumentStatus::Deleted,
        DocumentStatus::Deleting,
    ];

    /// States a document may be in for an update to `self` to apply.
    ///
    /// Terminal states list themselves so a redelivered job that re-applies
    /// its outcome is a no-op success. `Queued` is creation-only.
    pub fn predecessors(self) -> &'static [DocumentStatus] {
        use DocumentStatus::*;
        match self {
            Queued => &[],
            Processing => &[Queued, Processing],
            Ready => &[Processing, Ready],
            Error => &[Processing, Error],
            Deleted | Deleting => &[Queued, Processing, Ready, Error],
        }
    }

    #[cfg(test)]
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        next.predecessors().contains(&self)
    }
}

/// Document record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub size_bytes: u64,
    pub status: DocumentStatus,
    pub page_count: Option<u32>,
    /// Per-document vector collection, assigned at creation and never reused
    #[serde(rename = "vectorCollectionRef")]
    pub vector_collection: String,
    pub blob_ref: String,
    /// SHA-256 of the uploaded bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Last reported pipeline stage (e.g. "pdf-parse", "indexing")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Column list matching [`Document::from_row`]
    pub(crate) const COLUMNS: &'static str = "id, owner_id, name, size_bytes, status, page_count, \
         vector_collection, blob_ref, content_hash, stage, progress, last_error, \
         created_at, updated_at, deleted_at";

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let size_bytes: i64 = row.get(3)?;
        let status_str: String = row.get(4)?;
        let page_count: Option<i64> = row.get(5)?;
        let progress: Option<i64> = row.get(10)?;
        let created_at_str: String = row.get(12)?;
        let updated_at_str: String = row.get(13)?;
        let deleted_at_str: Option<String> = row.get(14)?;

        let status = DocumentStatus::from_str(&status_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            size_bytes: size_bytes.max(0) as u64,
            status,
            page_count: page_count.map(|p| p as u32),
            vector_collection: row.get(6)?,
            blob_ref: row.get(7)?,
            content_hash: row.get(8)?,
            stage: row.get(9)?,
            progress: progress.map(|p| p.clamp(0, 100) as u8),
            last_error: row.get(11)?,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
            deleted_at: deleted_at_str.as_deref().map(parse_timestamp),
        })
    }
}

/// Partial update applied by `Database::update_document_status`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentPatch {
    pub status: Option<DocumentStatus>,
    pub page_count: Option<u32>,
    pub stage: Option<String>,
    pub progress: Option<u8>,
    /// `Some(None)` clears a previous error
    pub last_error: Option<Option<String>>,
    pub content_hash: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DocumentPatch {
    pub fn status(status: DocumentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_page_count(mut self, pages: u32) -> Self {
        self.page_count = Some(pages);
        self
    }

    pub fn with_progress(mut self, stage: impl Into<String>, pct: u8) -> Self {
        self.stage = Some(stage.into());
        self.progress = Some(pct.min(100));
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_deleted_at(mut self, at: DateTime<Utc>) -> Self {
        self.deleted_at = Some(at);
        self
    }
}

/// Job types understood by the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    FileReady,
    HardDelete,
}

/// Queue state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Job record
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Attempts started so far, including the current one while running
    pub attempts: u32,
    pub max_attempts: u32,
    pub run_after: DateTime<Utc>,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub(crate) const COLUMNS: &'static str = "id, kind, payload, status, attempts, max_attempts, \
         run_after, last_error, result, created_at, updated_at";

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let kind_str: String = row.get(1)?;
        let payload_str: String = row.get(2)?;
        let status_str: String = row.get(3)?;
        let result_str: Option<String> = row.get(8)?;
        let run_after_str: String = row.get(6)?;
        let created_at_str: String = row.get(9)?;
        let updated_at_str: String = row.get(10)?;

        let kind = JobKind::from_str(&kind_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
        let payload = serde_json::from_str(&payload_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
        let status = JobStatus::from_str(&status_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

        Ok(Self {
            id: row.get(0)?,
            kind,
            payload,
            status,
            attempts: row.get(4)?,
            max_attempts: row.get(5)?,
            run_after: parse_timestamp(&run_after_str),
            last_error: row.get(7)?,
            result: result_str.and_then(|s| serde_json::from_str(&s).ok()),
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }
}
