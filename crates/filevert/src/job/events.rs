//! Job event broadcaster for in-process subscribers.
//!
//! Every committed job write is published once. Sending never blocks and
//! never fails the write: with no subscribers the event is dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::model::{ConversionJob, JobStatus};

/// A committed change to a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub owner_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn from_job(job: &ConversionJob) -> Self {
        Self {
            job_id: job.id.clone(),
            owner_id: job.owner_id.clone(),
            status: job.status,
            progress: job.progress,
            result_file_name: job.result_file_name.clone(),
            error: job.error.clone(),
            timestamp: job.updated_at,
        }
    }
}

/// Broadcasts job events for streaming.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: JobEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobRef;
    use crate::job::model::SourceFileRef;

    fn sample_job() -> ConversionJob {
        ConversionJob::new(
            "alice",
            SourceFileRef {
                file_id: "file-1".to_string(),
                file_name: "a.pdf".to_string(),
                blob: BlobRef::new("uploads/x/a.pdf"),
            },
            "PDF",
            "TXT",
        )
    }

    #[test]
    fn test_send_receive() {
        let broadcaster = JobEventBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        let job = sample_job();
        broadcaster.send(JobEvent::from_job(&job));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, job.id);
        assert_eq!(received.status, JobStatus::Processing);
        assert_eq!(received.progress, 0);
    }

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = JobEventBroadcaster::default();
        broadcaster.send(JobEvent::from_job(&sample_job()));
    }

    #[test]
    fn test_event_json_shape() {
        let event = JobEvent::from_job(&sample_job());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "PROCESSING");
        assert!(json.get("jobId").is_some());
        assert!(json.get("error").is_none());
    }
}
