//! Conversion job record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::blob::BlobRef;

/// Lifecycle status of a conversion job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// `COMPLETED` and `FAILED` admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// The input file a job converts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceFileRef {
    pub file_id: String,
    pub file_name: String,
    pub blob: BlobRef,
}

/// A persisted conversion job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionJob {
    pub id: String,
    pub owner_id: String,
    pub source: SourceFileRef,
    pub source_format: String,
    pub target_format: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<BlobRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A single write against a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    /// Checkpoint while processing.
    Progress(u8),
    /// The result was persisted.
    Complete {
        result: BlobRef,
        result_file_name: String,
    },
    /// Conversion failed.
    Fail { error: String },
}

/// Rejected state transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("job is already {0}")]
    Terminal(JobStatus),

    #[error("progress cannot go from {current} back to {requested}")]
    ProgressRegression { current: u8, requested: u8 },

    #[error("progress {0} is outside 0..=100")]
    ProgressOutOfRange(u8),
}

impl ConversionJob {
    /// Creates a new job record, already in flight.
    pub fn new(
        owner_id: &str,
        source: SourceFileRef,
        source_format: &str,
        target_format: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            source,
            source_format: source_format.to_ascii_uppercase(),
            target_format: target_format.to_ascii_uppercase(),
            status: JobStatus::Processing,
            progress: 0,
            result: None,
            result_file_name: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns the job as it looks after `update`, or why the update is
    /// not allowed. The receiver is left untouched.
    pub fn apply(&self, update: &JobUpdate) -> Result<ConversionJob, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }

        let now = Utc::now();
        let mut next = self.clone();
        next.updated_at = now;

        match update {
            JobUpdate::Progress(requested) => {
                let requested = *requested;
                if requested > 100 {
                    return Err(TransitionError::ProgressOutOfRange(requested));
                }
                if requested < self.progress {
                    return Err(TransitionError::ProgressRegression {
                        current: self.progress,
                        requested,
                    });
                }
                next.status = JobStatus::Processing;
                next.progress = requested;
            }
            JobUpdate::Complete {
                result,
                result_file_name,
            } => {
                next.status = JobStatus::Completed;
                next.progress = 100;
                next.result = Some(result.clone());
                next.result_file_name = Some(result_file_name.clone());
                next.error = None;
                next.completed_at = Some(now);
            }
            JobUpdate::Fail { error } => {
                next.status = JobStatus::Failed;
                next.progress = 0;
                next.result = None;
                next.result_file_name = None;
                next.error = Some(error.clone());
                next.completed_at = Some(now);
            }
        }

        Ok(next)
    }
}
