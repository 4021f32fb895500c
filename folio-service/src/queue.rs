//! Durable job queue with at-least-once delivery.
//!
//! Jobs live in the `jobs` table. A worker slot claims the oldest due job,
//! runs its handler and settles the outcome:
//! - success stores the result and emits `Completed`
//! - a retryable failure with attempts left is rescheduled with backoff
//! - anything else marks the job failed and emits `Failed`
//!
//! Jobs that were `running` when the process died are returned to `pending`
//! on startup, so handlers must be safe to re-run from the top.

mod progress;
mod types;
mod workers;

pub use progress::ProgressReporter;
pub use types::{
    ClaimedJob, HardDeleteJob, IngestJob, JobPayload, ProgressEvent, QueueEvent, RetryPolicy,
};
pub use workers::WorkerPool;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::db::{Database, Document};
use crate::error::{DatabaseError, ServiceError, ServiceResult, format_error_chain};

/// Executes claimed jobs
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one attempt. The returned value is stored as the job result and
    /// carried by the `Completed` event.
    async fn handle(
        &self,
        job: &ClaimedJob,
        progress: &ProgressReporter,
    ) -> ServiceResult<serde_json::Value>;
}

/// Handle to the job queue
pub struct JobQueue {
    db: Arc<Database>,
    retry: RetryPolicy,
    events: UnboundedSender<QueueEvent>,
}

impl JobQueue {
    pub fn new(db: Arc<Database>, retry: RetryPolicy, events: UnboundedSender<QueueEvent>) -> Self {
        Self { db, retry, events }
    }

    /// Enqueue a job under the default retry policy. Returns the job id.
    pub fn enqueue(&self, payload: &JobPayload) -> ServiceResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let value = payload.to_value().map_err(DatabaseError::Serialization)?;
        self.db.insert_job(
            &id,
            payload.kind(),
            &value,
            self.retry.max_attempts,
            Utc::now(),
        )?;

        self.record_enqueued(&id, payload);
        Ok(id)
    }

    /// Insert `document` and enqueue its job atomically. Returns the job id.
    pub fn enqueue_with_document(
        &self,
        document: &Document,
        payload: &JobPayload,
    ) -> ServiceResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let value = payload.to_value().map_err(DatabaseError::Serialization)?;
        self.db.insert_document_with_job(
            document,
            &id,
            payload.kind(),
            &value,
            self.retry.max_attempts,
            Utc::now(),
        )?;

        self.record_enqueued(&id, payload);
        Ok(id)
    }

    fn record_enqueued(&self, id: &str, payload: &JobPayload) {
        metrics::counter!("folio_jobs_enqueued_total", "kind" => payload.kind().to_string())
            .increment(1);
        info!(job_id = %id, kind = %payload.kind(), doc_id = %payload.doc_id(), "Job enqueued");
    }

    /// Return jobs interrupted by a crash to `pending`
    pub fn requeue_interrupted(&self) -> ServiceResult<usize> {
        let count = self.db.requeue_running_jobs()?;
        if count > 0 {
            warn!(count, "Requeued jobs interrupted by shutdown or crash");
        }
        Ok(count)
    }

    /// Claim the next due job, failing any whose payload cannot be decoded.
    pub fn claim_next(&self) -> ServiceResult<Option<ClaimedJob>> {
        loop {
            let Some(record) = self.db.claim_next_job(Utc::now())? else {
                return Ok(None);
            };

            match JobPayload::from_parts(record.kind, record.payload) {
                Ok(payload) => {
                    return Ok(Some(ClaimedJob {
                        id: record.id,
                        payload,
                        attempt: record.attempts,
                        max_attempts: record.max_attempts,
                    }));
                }
                Err(e) => {
                    error!(job_id = %record.id, kind = %record.kind, error = %e, "Discarding job with malformed payload");
                    self.db
                        .fail_job(&record.id, &format!("malformed payload: {}", e))?;
                }
            }
        }
    }

    /// Claim and run one job. Returns `false` when nothing was due.
    pub async fn run_one(&self, handler: &dyn JobHandler) -> ServiceResult<bool> {
        let Some(job) = self.claim_next()? else {
            return Ok(false);
        };

        let reporter = ProgressReporter::new(self.events.clone());
        let outcome = AssertUnwindSafe(handler.handle(&job, &reporter))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(ServiceError::Internal {
                    message: format!("job handler panicked: {}", message),
                })
            });

        self.settle(job, outcome)?;
        Ok(true)
    }

    fn settle(&self, job: ClaimedJob, outcome: ServiceResult<serde_json::Value>) -> ServiceResult<()> {
        let kind = job.payload.kind();

        match outcome {
            Ok(result) => {
                self.db.complete_job(&job.id, &result)?;
                metrics::counter!("folio_jobs_completed_total", "kind" => kind.to_string())
                    .increment(1);
                info!(job_id = %job.id, %kind, attempt = job.attempt, "Job completed");
                self.emit(QueueEvent::Completed {
                    job_id: job.id,
                    kind,
                    result,
                });
            }
            Err(e) if e.is_retryable() && !job.is_final_attempt() => {
                let reason = format_error_chain(&e);
                let delay = self.retry.delay_after(job.attempt);
                let run_after = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(1));
                self.db.reschedule_job(&job.id, run_after, &reason)?;
                metrics::counter!("folio_jobs_retried_total", "kind" => kind.to_string())
                    .increment(1);
                warn!(
                    job_id = %job.id,
                    %kind,
                    attempt = job.attempt,
                    max_attempts = job.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "Job failed, retry scheduled"
                );
            }
            Err(e) => {
                let reason = format_error_chain(&e);
                self.db.fail_job(&job.id, &reason)?;
                metrics::counter!(
                    "folio_jobs_failed_total",
                    "kind" => kind.to_string(),
                    "error" => e.error_code()
                )
                .increment(1);
                error!(
                    job_id = %job.id,
                    %kind,
                    attempt = job.attempt,
                    retryable = e.is_retryable(),
                    error = %reason,
                    "Job failed permanently"
                );
                self.emit(QueueEvent::Failed {
                    job_id: job.id,
                    payload: job.payload,
                    reason,
                });
            }
        }

        Ok(())
    }

    fn emit(&self, event: QueueEvent) {
        if self.events.send(event).is_err() {
            warn!("Queue event channel closed, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::JobStatus;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    enum Behavior {
        Succeed,
        FailRetryable,
        FailTerminal,
        Panic,
    }

    struct ScriptedHandler {
        behavior: Behavior,
        calls: AtomicU32,
    }

    impl ScriptedHandler {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        async fn handle(
            &self,
            job: &ClaimedJob,
            progress: &ProgressReporter,
        ) -> ServiceResult<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            progress.step("owner", job.payload.doc_id(), 10, "download");
            match self.behavior {
                Behavior::Succeed => Ok(json!({"attempt": job.attempt})),
                Behavior::FailRetryable => Err(ServiceError::BlobUnavailable {
                    blob_ref: "b".into(),
                    message: "offline".into(),
                }),
                Behavior::FailTerminal => Err(ServiceError::NoChunks {
                    document_id: job.payload.doc_id().to_string(),
                }),
                Behavior::Panic => panic!("handler exploded"),
            }
        }
    }

    fn queue(
        max_attempts: u32,
    ) -> (JobQueue, Arc<Database>, mpsc::UnboundedReceiver<QueueEvent>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        let retry = RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
        };
        (JobQueue::new(db.clone(), retry, tx), db, rx)
    }

    fn ingest(doc_id: &str) -> JobPayload {
        JobPayload::FileReady(IngestJob {
            doc_id: doc_id.into(),
            owner_id: Some("owner".into()),
        })
    }

    #[tokio::test]
    async fn test_success_emits_progress_then_completed() {
        let (queue, db, mut rx) = queue(3);
        let id = queue.enqueue(&ingest("d1")).unwrap();
        let handler = ScriptedHandler::new(Behavior::Succeed);

        assert!(queue.run_one(&handler).await.unwrap());
        assert!(!queue.run_one(&handler).await.unwrap());

        assert!(matches!(rx.recv().await, Some(QueueEvent::Progress(_))));
        match rx.recv().await {
            Some(QueueEvent::Completed { job_id, result, .. }) => {
                assert_eq!(job_id, id);
                assert_eq!(result, json!({"attempt": 1}));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(db.get_job(&id).unwrap().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_retryable_failure_exhausts_attempts() {
        let (queue, db, mut rx) = queue(3);
        let id = queue.enqueue(&ingest("d1")).unwrap();
        let handler = ScriptedHandler::new(Behavior::FailRetryable);

        for _ in 0..3 {
            assert!(queue.run_one(&handler).await.unwrap());
        }
        assert!(!queue.run_one(&handler).await.unwrap());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

        let job = db.get_job(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);

        let mut failed = 0;
        while let Ok(event) = rx.try_recv() {
            if let QueueEvent::Failed { payload, reason, .. } = event {
                assert_eq!(payload, ingest("d1"));
                assert!(reason.contains("offline"));
                failed += 1;
            }
        }
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_not_retried() {
        let (queue, db, _rx) = queue(3);
        let id = queue.enqueue(&ingest("d1")).unwrap();
        let handler = ScriptedHandler::new(Behavior::FailTerminal);

        assert!(queue.run_one(&handler).await.unwrap());
        assert!(!queue.run_one(&handler).await.unwrap());
        assert_eq!(db.get_job(&id).unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_panic_is_caught_and_retried() {
        let (queue, db, _rx) = queue(2);
        let id = queue.enqueue(&ingest("d1")).unwrap();
        let handler = ScriptedHandler::new(Behavior::Panic);

        assert!(queue.run_one(&handler).await.unwrap());
        let job = db.get_job(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.last_error.unwrap().contains("handler exploded"));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_discarded() {
        let (queue, db, _rx) = queue(3);
        db.insert_job(
            "bad",
            crate::db::JobKind::HardDelete,
            &json!({"docId": "only"}),
            3,
            Utc::now(),
        )
        .unwrap();

        assert!(queue.claim_next().unwrap().is_none());
        assert_eq!(db.get_job("bad").unwrap().unwrap().status, JobStatus::Failed);
    }
}
