//! Conversion service: the operations the HTTP API exposes.
//!
//! Every operation is scoped to a [`Caller`]. Records belonging to another
//! owner are indistinguishable from records that do not exist.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blob::{BlobError, BlobStore, UPLOADS_NAMESPACE};
use crate::db::{Database, DatabaseError};
use crate::files::{FileRegistry, NewFile, StoredFile};
use crate::formats;
use crate::job::{ConversionJob, JobQuery, JobStatus, JobStore, JobStoreError, JobUpdate, SourceFileRef};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::poller::{PollError, StatusSource};
use crate::provider::ConversionProvider;

/// Default upload ceiling: 100 MB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Job store error: {0}")]
    Jobs(#[source] JobStoreError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Blob storage error: {0}")]
    Blob(#[from] BlobError),
}

impl From<JobStoreError> for ServiceError {
    fn from(e: JobStoreError) -> Self {
        match e {
            JobStoreError::NotFound(_) => ServiceError::NotFound("Conversion job not found".to_string()),
            other => ServiceError::Jobs(other),
        }
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// The identity every operation is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(String);

impl Caller {
    /// Returns `None` for a blank identity.
    pub fn new(owner_id: &str) -> Option<Self> {
        let owner_id = owner_id.trim();
        (!owner_id.is_empty()).then(|| Self(owner_id.to_string()))
    }

    pub fn owner_id(&self) -> &str {
        &self.0
    }
}

// ─── Request / response types ───────────────────────────────────────────────

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    #[serde(alias = "fileId")]
    pub source_file_id: Option<String>,
    pub target_format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// What a caller sees of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub source_file_name: String,
    pub source_format: String,
    pub target_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_file_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<ConversionJob> for JobStatusView {
    fn from(job: ConversionJob) -> Self {
        Self {
            id: job.id,
            status: job.status,
            progress: job.progress,
            error: job.error,
            source_file_name: job.source.file_name,
            source_format: job.source_format,
            target_format: job.target_format,
            result_file_name: job.result_file_name,
            created_at: job.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    pub jobs: Vec<JobStatusView>,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

/// Bytes ready to hand back to a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: String,
}

/// An upload as received from the caller.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

// ─── Service ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ConversionService {
    jobs: JobStore,
    files: FileRegistry,
    blobs: Arc<dyn BlobStore>,
    orchestrator: Orchestrator,
    max_upload_bytes: u64,
}

impl ConversionService {
    pub fn new(
        db: Database,
        jobs: JobStore,
        blobs: Arc<dyn BlobStore>,
        provider: Arc<dyn ConversionProvider>,
        orchestrator_config: OrchestratorConfig,
    ) -> Self {
        let orchestrator = Orchestrator::new(jobs.clone(), Arc::clone(&blobs), provider, orchestrator_config);
        Self {
            jobs,
            files: FileRegistry::new(db),
            blobs,
            orchestrator,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: u64) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// A status source that reads this service in-process as `caller`.
    pub fn status_source(&self, caller: Caller) -> LocalStatusSource {
        LocalStatusSource {
            service: self.clone(),
            caller,
        }
    }

    // ─── Jobs ───────────────────────────────────────────────────────────

    /// Validates the request, records the job and starts converting it.
    ///
    /// Returns as soon as the job is recorded; the conversion runs detached.
    pub fn create_job(&self, caller: &Caller, request: CreateJobRequest) -> ServiceResult<CreateJobResponse> {
        let file_id = request
            .source_file_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let target = request.target_format.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let (Some(file_id), Some(target)) = (file_id, target) else {
            return Err(ServiceError::Validation(
                "File ID and target format are required".to_string(),
            ));
        };

        let target_format = formats::normalize_format(target)
            .ok_or_else(|| ServiceError::Validation(format!("Unknown target format '{}'", target)))?;

        let file = self
            .files
            .get(file_id, caller.owner_id())?
            .ok_or_else(|| ServiceError::NotFound("File not found".to_string()))?;

        if !formats::is_conversion_supported(&file.mime_type, &target_format) {
            return Err(ServiceError::Validation(format!(
                "Conversion from {} to {} is not supported",
                file.mime_type, target_format
            )));
        }

        let source_format = formats::format_from_file_name(&file.original_name)
            .or_else(|| formats::format_for_mime(&file.mime_type))
            .ok_or_else(|| {
                ServiceError::Validation(format!("Cannot determine the format of '{}'", file.original_name))
            })?;

        let job = self.jobs.create(
            caller.owner_id(),
            SourceFileRef {
                file_id: file.id,
                file_name: file.original_name,
                blob: file.blob,
            },
            &source_format,
            &target_format,
        )?;

        if let Err(e) = self.orchestrator.spawn(job.clone()) {
            error!("Could not start conversion job {}: {}", job.id, e);
            if let Err(fail_err) = self.jobs.update(&job.id, &JobUpdate::Fail { error: e.to_string() }) {
                error!("Could not record failure of job {}: {}", job.id, fail_err);
            }
            return Err(e.into());
        }

        info!("Created conversion job {} ({} -> {})", job.id, source_format, target_format);
        Ok(CreateJobResponse {
            job_id: job.id,
            status: job.status,
        })
    }

    pub fn job_status(&self, caller: &Caller, job_id: &str) -> ServiceResult<JobStatusView> {
        Ok(self.jobs.get(job_id, caller.owner_id())?.into())
    }

    pub fn list_jobs(&self, caller: &Caller, query: &JobQuery) -> ServiceResult<JobListResponse> {
        let page = self.jobs.list(caller.owner_id(), query)?;
        Ok(JobListResponse {
            jobs: page.jobs.into_iter().map(JobStatusView::from).collect(),
            total: page.total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    /// Returns the converted bytes. Not found unless the job completed.
    pub async fn download_result(&self, caller: &Caller, job_id: &str) -> ServiceResult<Download> {
        let job = self.jobs.get(job_id, caller.owner_id())?;
        let (result, file_name) = match (job.status, job.result, job.result_file_name) {
            (JobStatus::Completed, Some(result), Some(file_name)) => (result, file_name),
            _ => return Err(ServiceError::NotFound("Converted file not found".to_string())),
        };

        let bytes = self.blobs.fetch(&result).await.map_err(|e| match e {
            BlobError::NotFound(_) => ServiceError::NotFound("Converted file not found in storage".to_string()),
            other => other.into(),
        })?;

        Ok(Download {
            bytes,
            content_type: formats::mime_for_format(&job.target_format).to_string(),
            file_name,
        })
    }

    /// Copies a completed job's result into the caller's files.
    pub async fn save_result_to_files(&self, caller: &Caller, job_id: &str) -> ServiceResult<StoredFile> {
        let job = self.jobs.get(job_id, caller.owner_id())?;
        if job.status != JobStatus::Completed {
            return Err(ServiceError::Conflict(format!(
                "Conversion job is {}, not COMPLETED",
                job.status
            )));
        }
        let target_format = job.target_format.clone();
        let download = self.download_result(caller, job_id).await?;

        let stored = self
            .store_file(
                caller,
                download.file_name,
                formats::mime_for_format(&target_format).to_string(),
                download.bytes,
            )
            .await?;
        info!("Saved result of job {} as file {}", job_id, stored.id);
        Ok(stored)
    }

    // ─── Files ──────────────────────────────────────────────────────────

    pub async fn upload_file(&self, caller: &Caller, upload: Upload) -> ServiceResult<StoredFile> {
        let file_name = upload.file_name.trim();
        if file_name.is_empty() {
            return Err(ServiceError::Validation("No file provided".to_string()));
        }
        if upload.bytes.len() as u64 > self.max_upload_bytes {
            return Err(ServiceError::Validation(format!(
                "File too large. Maximum size is {}MB",
                self.max_upload_bytes / (1024 * 1024)
            )));
        }

        let mime_type = upload
            .content_type
            .as_deref()
            .map(str::trim)
            .filter(|ct| !ct.is_empty() && *ct != formats::FALLBACK_MIME_TYPE)
            .map(str::to_string)
            .unwrap_or_else(|| formats::guess_mime_type(file_name));

        self.store_file(caller, file_name.to_string(), mime_type, upload.bytes).await
    }

    pub fn list_files(&self, caller: &Caller, search: Option<&str>) -> ServiceResult<Vec<StoredFile>> {
        Ok(self.files.list(caller.owner_id(), search)?)
    }

    pub fn get_file(&self, caller: &Caller, file_id: &str) -> ServiceResult<StoredFile> {
        self.files
            .get(file_id, caller.owner_id())?
            .ok_or_else(|| ServiceError::NotFound("File not found".to_string()))
    }

    pub async fn download_file(&self, caller: &Caller, file_id: &str) -> ServiceResult<Download> {
        let file = self.get_file(caller, file_id)?;
        let bytes = self.blobs.fetch(&file.blob).await.map_err(|e| match e {
            BlobError::NotFound(_) => ServiceError::NotFound("File not found in storage".to_string()),
            other => other.into(),
        })?;

        Ok(Download {
            bytes,
            content_type: file.mime_type,
            file_name: file.original_name,
        })
    }

    /// Removes the file record, then its bytes.
    pub async fn delete_file(&self, caller: &Caller, file_id: &str) -> ServiceResult<()> {
        let file = self.get_file(caller, file_id)?;
        if !self.files.remove(&file.id, caller.owner_id())? {
            return Err(ServiceError::NotFound("File not found".to_string()));
        }

        match self.blobs.delete(&file.blob).await {
            Ok(()) | Err(BlobError::NotFound(_)) => {}
            Err(e) => warn!("Deleted file {} but its blob could not be removed: {}", file.id, e),
        }
        Ok(())
    }

    async fn store_file(
        &self,
        caller: &Caller,
        file_name: String,
        mime_type: String,
        bytes: Vec<u8>,
    ) -> ServiceResult<StoredFile> {
        let size = bytes.len() as u64;
        let blob = self.blobs.store(UPLOADS_NAMESPACE, &file_name, bytes).await?;

        let registered = self.files.register(
            caller.owner_id(),
            NewFile {
                original_name: file_name,
                mime_type,
                size,
                blob: blob.clone(),
            },
        );

        match registered {
            Ok(stored) => Ok(stored),
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&blob).await {
                    warn!("Could not remove orphaned blob {}: {}", blob, cleanup);
                }
                Err(e.into())
            }
        }
    }
}

/// Reads job status in-process on behalf of one caller.
#[derive(Clone)]
pub struct LocalStatusSource {
    service: ConversionService,
    caller: Caller,
}

#[async_trait]
impl StatusSource for LocalStatusSource {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatusView, PollError> {
        match self.service.job_status(&self.caller, job_id) {
            Ok(view) => Ok(view),
            Err(ServiceError::NotFound(message)) | Err(ServiceError::Validation(message)) => {
                Err(PollError::Fatal(message))
            }
            Err(e) => Err(PollError::Transient(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobRef, FsBlobStore};
    use crate::provider::{Result as ProviderResult, SubmittedJob, UploadForm};
    use tempfile::TempDir;

    /// Accepts every job and never finishes it.
    struct StalledProvider;

    #[async_trait]
    impl ConversionProvider for StalledProvider {
        async fn submit(&self, _: &str, _: &str) -> ProviderResult<SubmittedJob> {
            Ok(SubmittedJob {
                provider_job_id: "p-1".to_string(),
                upload: UploadForm {
                    url: "http://unused".to_string(),
                    parameters: vec![],
                },
            })
        }

        async fn upload(&self, _: &UploadForm, _: &str, _: Vec<u8>) -> ProviderResult<()> {
            Ok(())
        }

        async fn wait_for_result(&self, _: &str) -> ProviderResult<String> {
            std::future::pending().await
        }

        async fn download(&self, _: &str) -> ProviderResult<Vec<u8>> {
            Ok(vec![])
        }
    }

    fn service(dir: &TempDir) -> ConversionService {
        let db = Database::open_in_memory().unwrap();
        ConversionService::new(
            db.clone(),
            JobStore::new(db),
            Arc::new(FsBlobStore::new(dir.path())),
            Arc::new(StalledProvider),
            OrchestratorConfig::default(),
        )
    }

    fn alice() -> Caller {
        Caller::new("alice").unwrap()
    }

    fn upload(name: &str, bytes: &[u8]) -> Upload {
        Upload {
            file_name: name.to_string(),
            content_type: None,
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn test_caller_rejects_blank() {
        assert!(Caller::new("  ").is_none());
        assert_eq!(Caller::new(" bob ").unwrap().owner_id(), "bob");
    }

    #[tokio::test]
    async fn test_upload_guesses_mime_and_enforces_limit() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).with_max_upload_bytes(4);

        let stored = service.upload_file(&alice(), upload("a.pdf", b"%PDF")).await.unwrap();
        assert_eq!(stored.mime_type, "application/pdf");
        assert_eq!(stored.size, 4);

        let err = service.upload_file(&alice(), upload("b.pdf", b"%PDF-1")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_job_validation() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let file = service.upload_file(&alice(), upload("a.pdf", b"%PDF")).await.unwrap();

        let missing = service.create_job(&alice(), CreateJobRequest::default()).unwrap_err();
        assert!(matches!(missing, ServiceError::Validation(_)));

        let unsupported = service
            .create_job(
                &alice(),
                CreateJobRequest {
                    source_file_id: Some(file.id.clone()),
                    target_format: Some("mp3".to_string()),
                },
            )
            .unwrap_err();
        assert!(matches!(unsupported, ServiceError::Validation(_)));

        let foreign = service
            .create_job(
                &Caller::new("bob").unwrap(),
                CreateJobRequest {
                    source_file_id: Some(file.id),
                    target_format: Some("docx".to_string()),
                },
            )
            .unwrap_err();
        assert!(matches!(foreign, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_job_returns_processing() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let file = service.upload_file(&alice(), upload("a.pdf", b"%PDF")).await.unwrap();

        let created = service
            .create_job(
                &alice(),
                CreateJobRequest {
                    source_file_id: Some(file.id),
                    target_format: Some("docx".to_string()),
                },
            )
            .unwrap();
        assert_eq!(created.status, JobStatus::Processing);

        let view = service.job_status(&alice(), &created.job_id).unwrap();
        assert_eq!(view.source_format, "PDF");
        assert_eq!(view.target_format, "DOCX");
        assert_eq!(view.source_file_name, "a.pdf");

        let err = service.job_status(&Caller::new("bob").unwrap(), &created.job_id).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_download_and_save_before_completion() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let file = service.upload_file(&alice(), upload("a.pdf", b"%PDF")).await.unwrap();
        let created = service
            .create_job(
                &alice(),
                CreateJobRequest {
                    source_file_id: Some(file.id),
                    target_format: Some("txt".to_string()),
                },
            )
            .unwrap();

        let err = service.download_result(&alice(), &created.job_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let err = service.save_result_to_files(&alice(), &created.job_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_save_completed_result() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let blobs = FsBlobStore::new(dir.path());
        let result = blobs
            .store(crate::blob::CONVERTED_NAMESPACE, "a.txt", b"hello".to_vec())
            .await
            .unwrap();

        let job = service
            .jobs()
            .create(
                "alice",
                SourceFileRef {
                    file_id: "f".to_string(),
                    file_name: "a.pdf".to_string(),
                    blob: BlobRef::new("uploads/x/a.pdf"),
                },
                "PDF",
                "TXT",
            )
            .unwrap();
        service
            .jobs()
            .update(
                &job.id,
                &JobUpdate::Complete {
                    result,
                    result_file_name: "a.txt".to_string(),
                },
            )
            .unwrap();

        let download = service.download_result(&alice(), &job.id).await.unwrap();
        assert_eq!(download.bytes, b"hello");
        assert_eq!(download.content_type, "text/plain");
        assert_eq!(download.file_name, "a.txt");

        let saved = service.save_result_to_files(&alice(), &job.id).await.unwrap();
        assert_eq!(saved.original_name, "a.txt");
        assert_eq!(service.list_files(&alice(), None).unwrap().len(), 1);
        let copy = service.download_file(&alice(), &saved.id).await.unwrap();
        assert_eq!(copy.bytes, b"hello");
    }

    #[tokio::test]
    async fn test_delete_file() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let file = service.upload_file(&alice(), upload("a.pdf", b"%PDF")).await.unwrap();

        let err = service.delete_file(&Caller::new("bob").unwrap(), &file.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        service.delete_file(&alice(), &file.id).await.unwrap();
        assert!(service.list_files(&alice(), None).unwrap().is_empty());
        assert!(matches!(
            service.download_file(&alice(), &file.id).await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_local_status_source() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let source = service.status_source(alice());

        let err = source.fetch_status("missing").await.unwrap_err();
        assert_eq!(err, PollError::Fatal("Conversion job not found".to_string()));
    }
}
