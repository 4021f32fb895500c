//! Document store operations.
//!
//! Status writes go through `update_document_status`, which is scoped to the
//! owning user and guarded by the document state machine.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use super::models::{Document, DocumentPatch, DocumentStatus};
use super::{Database, format_timestamp};
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Insert a document without a job; production rows go through
    /// `insert_document_with_job`
    #[cfg(test)]
    pub fn insert_document(&self, doc: &Document) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();
        insert_document_row(&conn, doc)
    }

    /// Get a document by ID regardless of owner
    pub fn find_document(&self, id: &str) -> ServiceResult<Option<Document>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {} FROM documents WHERE id = ?1", Document::COLUMNS),
            params![id],
            Document::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Apply a partial update to a document owned by `owner_id`.
    ///
    /// When the patch sets a status, the update only applies if the current
    /// status is a legal predecessor. Returns whether a row was changed.
    pub fn update_document_status(
        &self,
        id: &str,
        owner_id: &str,
        patch: &DocumentPatch,
    ) -> ServiceResult<bool> {
        let mut assignments: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = patch.status {
            assignments.push("status = ?");
            values.push(Value::Text(status.to_string()));
        }
        if let Some(pages) = patch.page_count {
            assignments.push("page_count = ?");
            values.push(Value::Integer(pages.into()));
        }
        if let Some(stage) = &patch.stage {
            assignments.push("stage = ?");
            values.push(Value::Text(stage.clone()));
        }
        if let Some(progress) = patch.progress {
            assignments.push("progress = ?");
            values.push(Value::Integer(progress.into()));
        }
        if let Some(last_error) = &patch.last_error {
            assignments.push("last_error = ?");
            values.push(match last_error {
                Some(message) => Value::Text(message.clone()),
                None => Value::Null,
            });
        }
        if let Some(hash) = &patch.content_hash {
            assignments.push("content_hash = ?");
            values.push(Value::Text(hash.clone()));
        }
        if let Some(deleted_at) = patch.deleted_at {
            assignments.push("deleted_at = ?");
            values.push(Value::Text(format_timestamp(deleted_at)));
        }
        assignments.push("updated_at = ?");
        values.push(Value::Text(format_timestamp(Utc::now())));

        let mut sql = format!(
            "UPDATE documents SET {} WHERE id = ? AND owner_id = ?",
            assignments.join(", ")
        );
        values.push(Value::Text(id.to_string()));
        values.push(Value::Text(owner_id.to_string()));

        if let Some(status) = patch.status {
            let allowed = status.predecessors();
            if allowed.is_empty() {
                return Ok(false);
            }
            let placeholders = vec!["?"; allowed.len()].join(", ");
            sql.push_str(&format!(" AND status IN ({})", placeholders));
            values.extend(allowed.iter().map(|s| Value::Text(s.to_string())));
        }

        let conn = self.conn.lock().unwrap();
        let rows = conn
            .execute(&sql, params_from_iter(values))
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Documents stuck in `queued`/`processing` created before `older_than`.
    pub fn list_stale_documents(
        &self,
        owner_id: Option<&str>,
        older_than: DateTime<Utc>,
    ) -> ServiceResult<Vec<Document>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM documents \
                 WHERE status IN ('queued', 'processing') AND created_at < ?1 \
                 AND (?2 IS NULL OR owner_id = ?2) \
                 ORDER BY created_at",
                Document::COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(
                params![format_timestamp(older_than), owner_id],
                Document::from_row,
            )
            .map_err(DatabaseError::Query)?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(docs)
    }

    /// List an owner's documents, newest first, excluding soft-deleted ones
    pub fn list_documents(&self, owner_id: &str) -> ServiceResult<Vec<Document>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM documents WHERE owner_id = ?1 AND status != ?2 \
                 ORDER BY created_at DESC",
                Document::COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(
                params![owner_id, DocumentStatus::Deleted.to_string()],
                Document::from_row,
            )
            .map_err(DatabaseError::Query)?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(docs)
    }

    /// Remove a document row owned by `owner_id`
    pub fn delete_document(&self, id: &str, owner_id: &str) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "DELETE FROM documents WHERE id = ?1 AND owner_id = ?2",
                params![id, owner_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }
}

pub(super) fn insert_document_row(conn: &Connection, doc: &Document) -> ServiceResult<()> {
    conn.execute(
        r#"
        INSERT INTO documents (id, owner_id, name, size_bytes, status, page_count, vector_collection, blob_ref, content_hash, stage, progress, last_error, created_at, updated_at, deleted_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
        params![
            doc.id,
            doc.owner_id,
            doc.name,
            doc.size_bytes as i64,
            doc.status.to_string(),
            doc.page_count,
            doc.vector_collection,
            doc.blob_ref,
            doc.content_hash,
            doc.stage,
            doc.progress,
            doc.last_error,
            format_timestamp(doc.created_at),
            format_timestamp(doc.updated_at),
            doc.deleted_at.map(format_timestamp),
        ],
    )
    .map_err(DatabaseError::Query)?;

    Ok(())
}
