//! Durable job queue storage.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::documents::insert_document_row;
use super::models::{Document, JobKind, JobRecord, JobStatus};
use super::{Database, format_timestamp};
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Insert a pending job that becomes due at `run_after`
    pub fn insert_job(
        &self,
        id: &str,
        kind: JobKind,
        payload: &serde_json::Value,
        max_attempts: u32,
        run_after: DateTime<Utc>,
    ) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();
        insert_job_row(&conn, id, kind, payload, max_attempts, run_after)
    }

    /// Insert a document together with the job that processes it. Either
    /// both rows are written or neither is.
    pub fn insert_document_with_job(
        &self,
        doc: &Document,
        job_id: &str,
        kind: JobKind,
        payload: &serde_json::Value,
        max_attempts: u32,
        run_after: DateTime<Utc>,
    ) -> ServiceResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        insert_document_row(&tx, doc)?;
        insert_job_row(&tx, job_id, kind, payload, max_attempts, run_after)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(())
    }

    /// Atomically move the oldest due pending job to `running`.
    pub fn claim_next_job(&self, now: DateTime<Utc>) -> ServiceResult<Option<JobRecord>> {
        let conn = self.conn.lock().unwrap();
        let now = format_timestamp(now);

        conn.query_row(
            &format!(
                "UPDATE jobs SET status = 'running', attempts = attempts + 1, updated_at = ?1 \
                 WHERE id = ( \
                     SELECT id FROM jobs WHERE status = 'pending' AND run_after <= ?1 \
                     ORDER BY run_after, created_at LIMIT 1 \
                 ) \
                 RETURNING {}",
                JobRecord::COLUMNS
            ),
            params![now],
            JobRecord::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Mark a running job completed and store its result
    pub fn complete_job(&self, id: &str, result: &serde_json::Value) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();
        let result_json = serde_json::to_string(result).map_err(DatabaseError::Serialization)?;

        conn.execute(
            "UPDATE jobs SET status = 'completed', result = ?1, last_error = NULL, updated_at = ?2 WHERE id = ?3",
            params![result_json, format_timestamp(Utc::now()), id],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Return a running job to `pending` with a new due time
    pub fn reschedule_job(
        &self,
        id: &str,
        run_after: DateTime<Utc>,
        error: &str,
    ) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "UPDATE jobs SET status = 'pending', run_after = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                format_timestamp(run_after),
                error,
                format_timestamp(Utc::now()),
                id
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Mark a job permanently failed
    pub fn fail_job(&self, id: &str, error: &str) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "UPDATE jobs SET status = 'failed', last_error = ?1, updated_at = ?2 WHERE id = ?3",
            params![error, format_timestamp(Utc::now()), id],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Return every `running` job to `pending` (crash recovery on startup).
    ///
    /// The interrupted attempt still counts towards `max_attempts`.
    pub fn requeue_running_jobs(&self) -> ServiceResult<usize> {
        let conn = self.conn.lock().unwrap();
        let now = format_timestamp(Utc::now());

        let rows = conn
            .execute(
                "UPDATE jobs SET status = 'pending', run_after = ?1, updated_at = ?1 WHERE status = 'running'",
                params![now],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows)
    }

    /// Get a job by ID
    pub fn get_job(&self, id: &str) -> ServiceResult<Option<JobRecord>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JobRecord::COLUMNS),
            params![id],
            JobRecord::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Number of jobs in each status, for health reporting
    pub fn job_counts(&self) -> ServiceResult<Vec<(JobStatus, u64)>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status ORDER BY status")
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count))
            })
            .map_err(DatabaseError::Query)?;

        let mut counts = Vec::new();
        for row in rows {
            let (status, count) = row.map_err(DatabaseError::Query)?;
            if let Ok(status) = status.parse::<JobStatus>() {
                counts.push((status, count.max(0) as u64));
            }
        }

        Ok(counts)
    }
}

fn insert_job_row(
    conn: &Connection,
    id: &str,
    kind: JobKind,
    payload: &serde_json::Value,
    max_attempts: u32,
    run_after: DateTime<Utc>,
) -> ServiceResult<()> {
    let now = format_timestamp(Utc::now());
    let payload_json = serde_json::to_string(payload).map_err(DatabaseError::Serialization)?;

    conn.execute(
        r#"
        INSERT INTO jobs (id, kind, payload, status, attempts, max_attempts, run_after, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?7)
        "#,
        params![
            id,
            kind.to_string(),
            payload_json,
            JobStatus::Pending.to_string(),
            max_attempts,
            format_timestamp(run_after),
            now,
        ],
    )
    .map_err(DatabaseError::Query)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_document;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_claim_respects_due_time_and_order() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        db.insert_job("later", JobKind::FileReady, &json!({}), 3, now + Duration::seconds(30))
            .unwrap();
        db.insert_job("first", JobKind::FileReady, &json!({"n": 1}), 3, now - Duration::seconds(2))
            .unwrap();
        db.insert_job("second", JobKind::HardDelete, &json!({"n": 2}), 3, now - Duration::seconds(1))
            .unwrap();

        let claimed = db.claim_next_job(now).unwrap().unwrap();
        assert_eq!(claimed.id, "first");
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.payload, json!({"n": 1}));

        let claimed = db.claim_next_job(now).unwrap().unwrap();
        assert_eq!(claimed.id, "second");
        assert_eq!(claimed.kind, JobKind::HardDelete);

        assert!(db.claim_next_job(now).unwrap().is_none());
    }

    #[test]
    fn test_document_and_job_insert_together() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        let doc = sample_document("doc-1", "alice");
        db.insert_document_with_job(&doc, "job-1", JobKind::FileReady, &json!({"docId": "doc-1"}), 3, now)
            .unwrap();
        assert!(db.find_document("doc-1").unwrap().is_some());
        assert_eq!(db.get_job("job-1").unwrap().unwrap().status, JobStatus::Pending);

        // A job insert that fails takes the document row with it
        let doc = sample_document("doc-2", "alice");
        let result =
            db.insert_document_with_job(&doc, "job-1", JobKind::FileReady, &json!({}), 3, now);
        assert!(result.is_err());
        assert!(db.find_document("doc-2").unwrap().is_none());
    }

    #[test]
    fn test_reschedule_then_complete() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.insert_job("job", JobKind::FileReady, &json!({}), 3, now).unwrap();

        db.claim_next_job(now).unwrap().unwrap();
        db.reschedule_job("job", now + Duration::seconds(5), "boom").unwrap();
        assert!(db.claim_next_job(now).unwrap().is_none());

        let claimed = db.claim_next_job(now + Duration::seconds(6)).unwrap().unwrap();
        assert_eq!(claimed.attempts, 2);
        assert_eq!(claimed.last_error.as_deref(), Some("boom"));

        db.complete_job("job", &json!({"ok": true})).unwrap();
        let job = db.get_job("job").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"ok": true})));
        assert!(job.last_error.is_none());
    }

    #[test]
    fn test_requeue_running_jobs() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.insert_job("job", JobKind::FileReady, &json!({}), 3, now).unwrap();
        db.claim_next_job(now).unwrap().unwrap();

        assert_eq!(db.requeue_running_jobs().unwrap(), 1);
        let job = db.get_job("job").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn test_fail_job_and_counts() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.insert_job("a", JobKind::FileReady, &json!({}), 1, now).unwrap();
        db.insert_job("b", JobKind::FileReady, &json!({}), 1, now).unwrap();
        db.fail_job("a", "terminal").unwrap();

        let counts = db.job_counts().unwrap();
        assert!(counts.contains(&(JobStatus::Failed, 1)));
        assert!(counts.contains(&(JobStatus::Pending, 1)));
    }
}
