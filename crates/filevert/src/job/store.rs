//! Job store with persistent database storage.
//!
//! Reads are scoped to an owner and go straight to SQLite; every row is read
//! whole under the connection lock. Writes go through a [`JobWriter`], of
//! which at most one exists per job id.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::events::{JobEvent, JobEventBroadcaster};
use super::model::{ConversionJob, JobStatus, JobUpdate, SourceFileRef, TransitionError};
use crate::blob::BlobRef;
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::{Database, DatabaseError};

/// Errors from job store operations.
#[derive(Error, Debug)]
pub enum JobStoreError {
    /// No job with this id is visible to the caller.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Another writer already holds the job.
    #[error("Job {0} already has an active writer")]
    AlreadyClaimed(String),

    #[error("Invalid update for job {job_id}: {source}")]
    Transition {
        job_id: String,
        #[source]
        source: TransitionError,
    },

    /// The row changed between read and write.
    #[error("Job {0} was modified concurrently")]
    ConcurrentModification(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ─── Row mapping ────────────────────────────────────────────────────────────

/// Fixed-width so `created_at` sorts lexicographically.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(s: &str, job_id: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptRow {
            table: "conversion_jobs",
            id: job_id.to_string(),
            reason: format!("bad timestamp '{}': {}", s, e),
        })
}

fn job_to_row(job: &ConversionJob) -> JobRow {
    JobRow {
        id: job.id.clone(),
        owner_id: job.owner_id.clone(),
        source_file_id: job.source.file_id.clone(),
        source_file_name: job.source.file_name.clone(),
        source_blob_key: job.source.blob.key().to_string(),
        source_format: job.source_format.clone(),
        target_format: job.target_format.clone(),
        status: job.status.as_str().to_string(),
        progress: job.progress,
        result_blob_key: job.result.as_ref().map(|b| b.key().to_string()),
        result_file_name: job.result_file_name.clone(),
        error: job.error.clone(),
        created_at: format_timestamp(job.created_at),
        updated_at: format_timestamp(job.updated_at),
        completed_at: job.completed_at.map(format_timestamp),
    }
}

fn job_from_row(row: JobRow) -> Result<ConversionJob, DatabaseError> {
    let status: JobStatus = row.status.parse().map_err(|reason| DatabaseError::CorruptRow {
        table: "conversion_jobs",
        id: row.id.clone(),
        reason,
    })?;
    let created_at = parse_timestamp(&row.created_at, &row.id)?;
    let updated_at = parse_timestamp(&row.updated_at, &row.id)?;
    let completed_at = match row.completed_at.as_deref() {
        Some(s) => Some(parse_timestamp(s, &row.id)?),
        None => None,
    };

    Ok(ConversionJob {
        id: row.id,
        owner_id: row.owner_id,
        source: SourceFileRef {
            file_id: row.source_file_id,
            file_name: row.source_file_name,
            blob: BlobRef::new(row.source_blob_key),
        },
        source_format: row.source_format,
        target_format: row.target_format,
        status,
        progress: row.progress,
        result: row.result_blob_key.map(BlobRef::new),
        result_file_name: row.result_file_name,
        error: row.error,
        created_at,
        updated_at,
        completed_at,
    })
}

// ─── Query types ────────────────────────────────────────────────────────────

/// Query parameters for job listing.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// A page of jobs, newest first.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPage {
    pub jobs: Vec<ConversionJob>,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

// ─── JobStore ───────────────────────────────────────────────────────────────

/// Persistent job store backed by rusqlite.
///
/// Cloning is cheap; clones share the database, the event channel and the
/// writer registry.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
    events: JobEventBroadcaster,
    writers: Arc<Mutex<HashSet<String>>>,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self::with_broadcaster(db, JobEventBroadcaster::default())
    }

    pub fn with_broadcaster(db: Database, events: JobEventBroadcaster) -> Self {
        Self {
            db,
            events,
            writers: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn events(&self) -> &JobEventBroadcaster {
        &self.events
    }

    fn writers(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.writers.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job writer registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Persists a new job in `PROCESSING` with progress 0.
    pub fn create(
        &self,
        owner_id: &str,
        source: SourceFileRef,
        source_format: &str,
        target_format: &str,
    ) -> Result<ConversionJob, JobStoreError> {
        let job = ConversionJob::new(owner_id, source, source_format, target_format);
        job_repo::insert(&self.db, &job_to_row(&job))?;

        log::info!(
            "Created conversion job {} ({} -> {})",
            job.id,
            job.source_format,
            job.target_format
        );
        self.events.send(JobEvent::from_job(&job));
        Ok(job)
    }

    /// Returns the job if it exists and belongs to `owner_id`. A job owned by
    /// someone else is reported exactly like a missing one.
    pub fn get(&self, job_id: &str, owner_id: &str) -> Result<ConversionJob, JobStoreError> {
        match job_repo::find_for_owner(&self.db, job_id, owner_id)? {
            Some(row) => Ok(job_from_row(row)?),
            None => Err(JobStoreError::NotFound(job_id.to_string())),
        }
    }

    /// Lists an owner's jobs, newest first.
    pub fn list(&self, owner_id: &str, query: &JobQuery) -> Result<JobPage, JobStoreError> {
        let filter = JobFilter {
            owner_id: Some(owner_id.to_string()),
            status: query.status.map(|s| s.as_str().to_string()),
            limit: query.limit,
            offset: query.offset,
        };
        let (rows, total) = job_repo::query(&self.db, &filter)?;
        let jobs = rows
            .into_iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(JobPage {
            jobs,
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    /// Every job still `PROCESSING` or `PENDING`, across all owners.
    pub fn processing_jobs(&self) -> Result<Vec<ConversionJob>, JobStoreError> {
        let mut rows = job_repo::find_by_status(&self.db, JobStatus::Pending.as_str())?;
        rows.extend(job_repo::find_by_status(
            &self.db,
            JobStatus::Processing.as_str(),
        )?);
        rows.into_iter()
            .map(|row| job_from_row(row).map_err(JobStoreError::from))
            .collect()
    }

    /// Takes the single write token for `job_id`.
    ///
    /// Fails with [`JobStoreError::AlreadyClaimed`] while another writer is
    /// alive. The token is released when the writer is dropped.
    pub fn claim(&self, job_id: &str) -> Result<JobWriter, JobStoreError> {
        if job_repo::find_by_id(&self.db, job_id)?.is_none() {
            return Err(JobStoreError::NotFound(job_id.to_string()));
        }

        if !self.writers().insert(job_id.to_string()) {
            return Err(JobStoreError::AlreadyClaimed(job_id.to_string()));
        }

        Ok(JobWriter {
            store: self.clone(),
            job_id: job_id.to_string(),
        })
    }

    /// Applies `update` to the stored job.
    ///
    /// The write is a compare-and-swap on the status and progress that were
    /// read, so an update computed from a stale record is rejected rather
    /// than silently overwriting a newer one.
    pub fn update(&self, job_id: &str, update: &JobUpdate) -> Result<ConversionJob, JobStoreError> {
        let row = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        let current = job_from_row(row)?;

        let next = current
            .apply(update)
            .map_err(|source| JobStoreError::Transition {
                job_id: job_id.to_string(),
                source,
            })?;

        let written = job_repo::compare_and_update(
            &self.db,
            &job_to_row(&next),
            current.status.as_str(),
            current.progress,
        )?;
        if !written {
            return Err(JobStoreError::ConcurrentModification(job_id.to_string()));
        }

        log::debug!(
            "Job {} -> {} ({}%)",
            next.id,
            next.status,
            next.progress
        );
        self.events.send(JobEvent::from_job(&next));
        Ok(next)
    }
}

// ─── JobWriter ──────────────────────────────────────────────────────────────

/// Exclusive write access to one job.
pub struct JobWriter {
    store: JobStore,
    job_id: String,
}

impl JobWriter {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn update(&self, update: &JobUpdate) -> Result<ConversionJob, JobStoreError> {
        self.store.update(&self.job_id, update)
    }

    pub fn progress(&self, progress: u8) -> Result<ConversionJob, JobStoreError> {
        self.update(&JobUpdate::Progress(progress))
    }

    pub fn complete(
        &self,
        result: BlobRef,
        result_file_name: String,
    ) -> Result<ConversionJob, JobStoreError> {
        self.update(&JobUpdate::Complete {
            result,
            result_file_name,
        })
    }

    pub fn fail(&self, error: impl Into<String>) -> Result<ConversionJob, JobStoreError> {
        self.update(&JobUpdate::Fail {
            error: error.into(),
        })
    }
}

impl Drop for JobWriter {
    fn drop(&mut self) {
        self.store.writers().remove(&self.job_id);
    }
}

impl std::fmt::Debug for JobWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobWriter")
            .field("job_id", &self.job_id)
            .finish()
    }
}
