//! Routes claimed jobs to their workers.

use async_trait::async_trait;

use super::hard_delete::HardDeleteWorker;
use super::ingest::IngestionWorker;
use crate::error::{DatabaseError, ServiceResult};
use crate::queue::{ClaimedJob, JobHandler, JobPayload, ProgressReporter};

pub struct JobDispatcher {
    ingest: IngestionWorker,
    hard_delete: HardDeleteWorker,
}

impl JobDispatcher {
    pub fn new(ingest: IngestionWorker, hard_delete: HardDeleteWorker) -> Self {
        Self {
            ingest,
            hard_delete,
        }
    }
}

#[async_trait]
impl JobHandler for JobDispatcher {
    async fn handle(
        &self,
        job: &ClaimedJob,
        progress: &ProgressReporter,
    ) -> ServiceResult<serde_json::Value> {
        match &job.payload {
            JobPayload::FileReady(ingest) => {
                let outcome = self
                    .ingest
                    .run(ingest, job.is_final_attempt(), progress)
                    .await?;
                Ok(outcome.to_value())
            }
            JobPayload::HardDelete(delete) => {
                let outcome = self.hard_delete.run(delete).await?;
                Ok(serde_json::to_value(outcome).map_err(DatabaseError::Serialization)?)
            }
        }
    }
}
