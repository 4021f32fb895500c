//! Database schema migrations.
//!
//! This module contains all database migrations and schema setup.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

/// Run all database migrations.
///
/// This function is called during database initialization to ensure
/// the schema is up to date.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    // Initial schema setup
    conn.execute_batch(
        r#"
        -- Documents table
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            status TEXT NOT NULL,
            page_count INTEGER,
            vector_collection TEXT NOT NULL UNIQUE,
            blob_ref TEXT NOT NULL,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status, created_at);

        -- Durable job queue
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            run_after TEXT NOT NULL,
            last_error TEXT,
            result TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(status, run_after);
        "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: e.to_string(),
    })?;

    run_progress_tracking_migration(conn)?;

    Ok(())
}

/// Add live progress columns and the content hash to documents.
fn run_progress_tracking_migration(conn: &Connection) -> ServiceResult<()> {
    let has_stage: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM pragma_table_info('documents') WHERE name='stage'",
            [],
            |row| row.get::<_, i64>(0).map(|count| count > 0),
        )
        .map_err(|e| DatabaseError::Migration {
            message: e.to_string(),
        })?;

    if !has_stage {
        conn.execute_batch(
            r#"
            ALTER TABLE documents ADD COLUMN stage TEXT;
            ALTER TABLE documents ADD COLUMN progress INTEGER;
            ALTER TABLE documents ADD COLUMN content_hash TEXT;
            "#,
        )
        .map_err(|e| DatabaseError::Migration {
            message: e.to_string(),
        })?;
    }

    Ok(())
}
