//! Test harness wiring a `ConversionService` to the HTTP fakes.
//!
//! Blobs go through the real `HttpBlobStore` against `FakeObjectStore`, and
//! conversions through the real `CloudConvertClient` against `FakeProvider`,
//! unless a custom provider is supplied.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use secrecy::SecretString;
use tokio::task::JoinHandle;

use filevert::files::StoredFile;
use filevert::service::{CreateJobRequest, CreateJobResponse, JobStatusView, Upload};
use filevert::{
    ApiState, Caller, CloudConvertClient, CloudConvertConfig, ConversionProvider,
    ConversionService, Database, HttpBlobStore, JobStore, OrchestratorConfig,
};

use super::fakes::{serve, FakeObjectStore, FakeProvider, ProviderScript};

pub const OWNER_HEADER: &str = "x-owner-id";
pub const STORE_TOKEN: &str = "store-token";
pub const API_KEY: &str = "test-api-key";

/// Knobs for building a harness.
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub orchestrator: OrchestratorConfig,
    pub max_upload_bytes: u64,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            max_poll_attempts: 5,
            orchestrator: OrchestratorConfig::default(),
            max_upload_bytes: 1024 * 1024,
        }
    }
}

pub struct TestHarness {
    pub provider: Option<FakeProvider>,
    pub store: FakeObjectStore,
    pub db: Database,
    pub service: ConversionService,
}

impl TestHarness {
    /// Harness backed by a fake provider following `script`.
    pub async fn new(script: ProviderScript) -> Self {
        Self::with_options(script, HarnessOptions::default()).await
    }

    pub async fn with_options(script: ProviderScript, options: HarnessOptions) -> Self {
        let provider = FakeProvider::start(script).await;

        let mut config = CloudConvertConfig::new(SecretString::from(API_KEY));
        config.api_url = provider.api_url();
        config.poll_interval = options.poll_interval;
        config.max_poll_attempts = options.max_poll_attempts;
        let client = CloudConvertClient::new(config).expect("Failed to build provider client");

        let mut harness = Self::build(Arc::new(client), options).await;
        harness.provider = Some(provider);
        harness
    }

    /// Harness using `provider` directly instead of the HTTP fake.
    pub async fn with_provider(provider: Arc<dyn ConversionProvider>, options: HarnessOptions) -> Self {
        Self::build(provider, options).await
    }

    async fn build(provider: Arc<dyn ConversionProvider>, options: HarnessOptions) -> Self {
        let store = FakeObjectStore::start(Some(STORE_TOKEN)).await;
        let blobs = HttpBlobStore::new(&store.base_url, Some(SecretString::from(STORE_TOKEN)))
            .expect("Failed to build blob store");

        let db = Database::open_in_memory().expect("Failed to open database");
        let service = ConversionService::new(
            db.clone(),
            JobStore::new(db.clone()),
            Arc::new(blobs),
            provider,
            options.orchestrator,
        )
        .with_max_upload_bytes(options.max_upload_bytes);

        Self {
            provider: None,
            store,
            db,
            service,
        }
    }

    pub fn provider(&self) -> &FakeProvider {
        self.provider.as_ref().expect("Harness has no fake provider")
    }

    pub fn caller(owner: &str) -> Caller {
        Caller::new(owner).expect("Blank owner id")
    }

    pub async fn upload(&self, owner: &str, name: &str, bytes: &[u8]) -> StoredFile {
        self.service
            .upload_file(
                &Self::caller(owner),
                Upload {
                    file_name: name.to_string(),
                    content_type: None,
                    bytes: bytes.to_vec(),
                },
            )
            .await
            .expect("Upload failed")
    }

    pub fn create_job(&self, owner: &str, file_id: &str, target: &str) -> CreateJobResponse {
        self.service
            .create_job(
                &Self::caller(owner),
                CreateJobRequest {
                    source_file_id: Some(file_id.to_string()),
                    target_format: Some(target.to_string()),
                },
            )
            .expect("Create job failed")
    }

    pub fn status(&self, owner: &str, job_id: &str) -> JobStatusView {
        self.service
            .job_status(&Self::caller(owner), job_id)
            .expect("Status read failed")
    }

    /// Reads status until the job is terminal. Panics after `timeout`.
    pub async fn wait_for_terminal(&self, owner: &str, job_id: &str, timeout: Duration) -> JobStatusView {
        let deadline = Instant::now() + timeout;
        loop {
            let view = self.status(owner, job_id);
            if view.status.is_terminal() {
                return view;
            }
            assert!(
                Instant::now() < deadline,
                "job {} still {} after {:?}",
                job_id,
                view.status,
                timeout
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Serves the HTTP API for this harness. Returns the base URL.
    pub async fn serve_api(&self) -> (String, JoinHandle<()>) {
        let state = ApiState::new(self.service.clone(), OWNER_HEADER);
        serve(filevert::router(state)).await
    }
}
