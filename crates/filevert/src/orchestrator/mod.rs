//! Job orchestrator: drives one conversion from source bytes to stored result.
//!
//! Each job runs as an inner tokio task supervised by an outer task. The
//! outer task owns the job's [`JobWriter`] and performs the terminal write
//! no matter how the inner task ends: success, error, or panic.

pub mod recovery;

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::blob::{BlobError, BlobRef, BlobStore, CONVERTED_NAMESPACE};
use crate::formats;
use crate::job::{
    ConversionJob, JobStatus, JobStore, JobStoreError, JobUpdate, JobWriter, TransitionError,
};
use crate::provider::{ConversionProvider, ProviderError};
use crate::sanitize::hash_id;

pub use recovery::{sweep_interrupted, INTERRUPTED_MESSAGE};

/// Progress written once the provider has accepted the source.
pub const PROGRESS_SUBMITTED: u8 = 25;
/// Progress written once the provider reports the conversion finished.
pub const PROGRESS_CONVERTED: u8 = 75;

/// Errors that end a conversion. Each one is recorded on the job as its
/// `error` message.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("Failed to read the source file: {0}")]
    Source(#[source] BlobError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Failed to save the converted file: {0}")]
    StoreResult(#[source] BlobError),

    #[error("{phase} timed out after {limit:?}")]
    PhaseTimeout {
        phase: &'static str,
        limit: Duration,
    },

    #[error("Failed to record progress: {0}")]
    Record(#[from] JobStoreError),

    #[error("Conversion crashed unexpectedly: {0}")]
    Panicked(String),

    #[error("Conversion task was cancelled")]
    Cancelled,
}

/// Time bounds and retry policy for orchestration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bound on fetching the source and submitting + uploading it.
    pub submit_timeout: Duration,
    /// Bound on downloading the provider's output.
    pub download_timeout: Duration,
    /// Bound on persisting the output to blob storage.
    pub store_timeout: Duration,
    /// Attempts for the final `COMPLETED`/`FAILED` write.
    pub terminal_write_attempts: u32,
    /// Base delay between terminal write attempts (multiplied by attempt).
    pub terminal_write_backoff: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(120),
            download_timeout: Duration::from_secs(300),
            store_timeout: Duration::from_secs(120),
            terminal_write_attempts: 3,
            terminal_write_backoff: Duration::from_millis(200),
        }
    }
}

/// Output of a successful conversion, before it is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConversionOutput {
    result: BlobRef,
    result_file_name: String,
}

/// Runs conversions detached from the request that created them.
#[derive(Clone)]
pub struct Orchestrator {
    store: JobStore,
    blobs: Arc<dyn BlobStore>,
    provider: Arc<dyn ConversionProvider>,
    config: Arc<OrchestratorConfig>,
}

impl Orchestrator {
    pub fn new(
        store: JobStore,
        blobs: Arc<dyn BlobStore>,
        provider: Arc<dyn ConversionProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            provider,
            config: Arc::new(config),
        }
    }

    /// Claims the job and starts converting it in the background.
    ///
    /// The claim happens before anything is spawned, so a job that already
    /// has a writer is rejected here. The returned handle resolves to the
    /// status the job was left in; callers are free to drop it.
    pub fn spawn(&self, job: ConversionJob) -> Result<JoinHandle<JobStatus>, JobStoreError> {
        let writer = self.store.claim(&job.id)?;
        let this = self.clone();
        Ok(tokio::spawn(async move { this.supervise(job, writer).await }))
    }

    async fn supervise(self, job: ConversionJob, writer: JobWriter) -> JobStatus {
        let span = info_span!(
            "conversion",
            job_id = %job.id,
            owner = %hash_id(&job.owner_id),
            source_format = %job.source_format,
            target_format = %job.target_format,
        );
        let writer = Arc::new(writer);

        let inner = tokio::spawn(
            self.clone()
                .convert(job.clone(), Arc::clone(&writer))
                .instrument(span.clone()),
        );

        let update = match inner.await {
            Ok(Ok(output)) => JobUpdate::Complete {
                result: output.result,
                result_file_name: output.result_file_name,
            },
            Ok(Err(e)) => JobUpdate::Fail {
                error: e.to_string(),
            },
            Err(join_error) if join_error.is_panic() => {
                let message = panic_message(join_error.into_panic());
                JobUpdate::Fail {
                    error: OrchestrationError::Panicked(message).to_string(),
                }
            }
            Err(_) => JobUpdate::Fail {
                error: OrchestrationError::Cancelled.to_string(),
            },
        };

        let result = match &update {
            JobUpdate::Complete { result, .. } => Some(result.clone()),
            _ => None,
        };
        let status = self.write_terminal(&writer, update).instrument(span).await;

        // A result the job never recorded is unreachable.
        if let Some(blob) = result.filter(|_| status != JobStatus::Completed) {
            if let Err(e) = self.blobs.delete(&blob).await {
                warn!("Could not remove unrecorded result {}: {}", blob.key(), e);
            }
        }
        status
    }

    async fn convert(
        self,
        job: ConversionJob,
        writer: Arc<JobWriter>,
    ) -> Result<ConversionOutput, OrchestrationError> {
        info!("Starting conversion of {}", job.source.file_name);

        let submitted = bounded(
            "Submitting the file to the conversion provider",
            self.config.submit_timeout,
            async {
                let bytes = self
                    .blobs
                    .fetch(&job.source.blob)
                    .await
                    .map_err(OrchestrationError::Source)?;
                let submitted = self
                    .provider
                    .submit(&job.source_format, &job.target_format)
                    .await?;
                self.provider
                    .upload(&submitted.upload, &job.source.file_name, bytes)
                    .await?;
                Ok(submitted)
            },
        )
        .await?;
        writer.progress(PROGRESS_SUBMITTED)?;
        debug!("Provider job {} accepted the source", submitted.provider_job_id);

        let result_url = self
            .provider
            .wait_for_result(&submitted.provider_job_id)
            .await?;
        writer.progress(PROGRESS_CONVERTED)?;

        let bytes = bounded(
            "Downloading the converted file",
            self.config.download_timeout,
            async { Ok(self.provider.download(&result_url).await?) },
        )
        .await?;

        let result_file_name = formats::result_file_name(&job.source.file_name, &job.target_format);
        let result = bounded(
            "Saving the converted file",
            self.config.store_timeout,
            async {
                self.blobs
                    .store(CONVERTED_NAMESPACE, &result_file_name, bytes)
                    .await
                    .map_err(OrchestrationError::StoreResult)
            },
        )
        .await?;

        Ok(ConversionOutput {
            result,
            result_file_name,
        })
    }

    /// Records the terminal state, retrying a bounded number of times.
    ///
    /// Returns the status the job was left in. `PROCESSING` means every
    /// attempt failed; the recovery sweep resolves such jobs on restart.
    async fn write_terminal(&self, writer: &JobWriter, update: JobUpdate) -> JobStatus {
        let attempts = self.config.terminal_write_attempts.max(1);

        for attempt in 1..=attempts {
            match writer.update(&update) {
                Ok(job) => {
                    match job.status {
                        JobStatus::Completed => info!(
                            "Conversion completed: {}",
                            job.result_file_name.as_deref().unwrap_or_default()
                        ),
                        _ => warn!(
                            "Conversion failed: {}",
                            job.error.as_deref().unwrap_or_default()
                        ),
                    }
                    return job.status;
                }
                Err(JobStoreError::Transition {
                    source: TransitionError::Terminal(status),
                    ..
                }) => {
                    warn!("Job {} was already {}", writer.job_id(), status);
                    return status;
                }
                Err(e) => {
                    warn!(
                        "Terminal write for job {} failed (attempt {}/{}): {}",
                        writer.job_id(),
                        attempt,
                        attempts,
                        e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.config.terminal_write_backoff * attempt).await;
                    }
                }
            }
        }

        error!(
            "Giving up on terminal write for job {}; it stays PROCESSING until the recovery sweep",
            writer.job_id()
        );
        JobStatus::Processing
    }
}

async fn bounded<T, F>(
    phase: &'static str,
    limit: Duration,
    fut: F,
) -> Result<T, OrchestrationError>
where
    F: Future<Output = Result<T, OrchestrationError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(OrchestrationError::PhaseTimeout { phase, limit }),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
