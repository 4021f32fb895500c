//! Fixed-size worker pool pulling from the job queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{JobHandler, JobQueue};

const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// N worker slots, each running one job at a time
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            handler,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    /// Spawn the worker slots. Each slot finishes its current job before
    /// observing cancellation.
    pub fn start(self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.concurrency)
            .map(|slot| {
                let queue = Arc::clone(&self.queue);
                let handler = Arc::clone(&self.handler);
                let shutdown = shutdown.clone();
                let poll_interval = self.poll_interval;

                tokio::spawn(async move {
                    info!(slot, "Job worker started");
                    loop {
                        if shutdown.is_cancelled() {
                            break;
                        }

                        let pause = match queue.run_one(handler.as_ref()).await {
                            Ok(true) => continue,
                            // Nothing due, sleep before checking again
                            Ok(false) => poll_interval,
                            Err(e) => {
                                error!(slot, error = %e, "Failed to run next job");
                                ERROR_BACKOFF
                            }
                        };

                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(pause) => {}
                        }
                    }
                    info!(slot, "Job worker stopped");
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::error::ServiceResult;
    use crate::queue::{ClaimedJob, IngestJob, JobPayload, ProgressReporter, RetryPolicy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct CountingHandler {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(
            &self,
            _job: &ClaimedJob,
            _progress: &ProgressReporter,
        ) -> ServiceResult<serde_json::Value> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(serde_json::json!({}))
        }
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_stops() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (tx, _rx) = mpsc::unbounded_channel();
        let queue = Arc::new(JobQueue::new(db, RetryPolicy::default(), tx));
        for i in 0..8 {
            queue
                .enqueue(&JobPayload::FileReady(IngestJob {
                    doc_id: format!("doc-{}", i),
                    owner_id: None,
                }))
                .unwrap();
        }

        let handler = Arc::new(CountingHandler {
            runs: AtomicUsize::new(0),
        });
        let shutdown = CancellationToken::new();
        let handles = WorkerPool::new(queue, handler.clone(), 4, Duration::from_millis(10))
            .start(shutdown.clone());

        tokio::time::timeout(Duration::from_secs(5), async {
            while handler.runs.load(Ordering::SeqCst) < 8 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(handler.runs.load(Ordering::SeqCst), 8);
    }
}
