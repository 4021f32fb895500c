//! Job payloads, queue events and retry policy.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::WorkerSettings;
use crate::db::{DocumentStatus, JobKind};

/// `file-ready`: ingest an uploaded document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestJob {
    pub doc_id: String,
    /// Declared owner; the worker falls back to the row's owner when empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

/// `hard-delete`: identifiers snapshotted when the delete was requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardDeleteJob {
    pub doc_id: String,
    pub owner_id: String,
    pub blob_ref: String,
    pub vector_collection_ref: String,
}

/// Typed job payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    FileReady(IngestJob),
    HardDelete(HardDeleteJob),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::FileReady(_) => JobKind::FileReady,
            JobPayload::HardDelete(_) => JobKind::HardDelete,
        }
    }

    pub fn doc_id(&self) -> &str {
        match self {
            JobPayload::FileReady(job) => &job.doc_id,
            JobPayload::HardDelete(job) => &job.doc_id,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            JobPayload::FileReady(job) => serde_json::to_value(job),
            JobPayload::HardDelete(job) => serde_json::to_value(job),
        }
    }

    pub fn from_parts(kind: JobKind, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            JobKind::FileReady => JobPayload::FileReady(serde_json::from_value(value)?),
            JobKind::HardDelete => JobPayload::HardDelete(serde_json::from_value(value)?),
        })
    }
}

/// A job claimed by a worker slot
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: String,
    pub payload: JobPayload,
    /// 1-based attempt number of this run
    pub attempt: u32,
    pub max_attempts: u32,
}

impl ClaimedJob {
    /// No retry will follow if this attempt fails
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Progress of one document through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub owner_id: String,
    pub doc_id: String,
    pub status: DocumentStatus,
    pub pct: u8,
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Events emitted by the queue while running jobs
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Progress(ProgressEvent),
    Completed {
        job_id: String,
        kind: JobKind,
        result: serde_json::Value,
    },
    Failed {
        job_id: String,
        payload: JobPayload,
        reason: String,
    },
}

/// Attempts and exponential backoff with jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&WorkerSettings> for RetryPolicy {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: settings.backoff_base,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt `attempt` (1-based):
    /// `base * 2^(attempt-1)` plus uniform jitter in `[0, base)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let shift = attempt.saturating_sub(1).min(20);
        let backoff_ms = base_ms.saturating_mul(1u64 << shift);
        let jitter_ms = if base_ms > 0 {
            rand::thread_rng().gen_range(0..base_ms)
        } else {
            0
        };
        Duration::from_millis(backoff_ms.saturating_add(jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_wire_format() {
        let payload = JobPayload::HardDelete(HardDeleteJob {
            doc_id: "d1".into(),
            owner_id: "u1".into(),
            blob_ref: "b1".into(),
            vector_collection_ref: "c1".into(),
        });
        let value = payload.to_value().unwrap();
        assert_eq!(
            value,
            json!({"docId": "d1", "ownerId": "u1", "blobRef": "b1", "vectorCollectionRef": "c1"})
        );
        assert_eq!(
            JobPayload::from_parts(JobKind::HardDelete, value).unwrap(),
            payload
        );
    }

    #[test]
    fn test_ingest_job_owner_optional() {
        let payload =
            JobPayload::from_parts(JobKind::FileReady, json!({"docId": "d1"})).unwrap();
        assert_eq!(
            payload,
            JobPayload::FileReady(IngestJob {
                doc_id: "d1".into(),
                owner_id: None
            })
        );
        assert!(JobPayload::from_parts(JobKind::FileReady, json!({"ownerId": "x"})).is_err());
    }

    #[test]
    fn test_backoff_doubles_with_jitter() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let first = policy.delay_after(1);
            assert!(first >= Duration::from_secs(1) && first < Duration::from_secs(2));
            let second = policy.delay_after(2);
            assert!(second >= Duration::from_secs(2) && second < Duration::from_secs(3));
        }
    }

    #[test]
    fn test_final_attempt() {
        let job = ClaimedJob {
            id: "j".into(),
            payload: JobPayload::FileReady(IngestJob {
                doc_id: "d".into(),
                owner_id: None,
            }),
            attempt: 3,
            max_attempts: 3,
        };
        assert!(job.is_final_attempt());
    }
}
