pub mod api;
pub mod blob;
pub mod config;
pub mod db;
pub mod error;
pub mod files;
pub mod formats;
pub mod job;
pub mod orchestrator;
pub mod poller;
pub mod provider;
pub mod sanitize;
pub mod secrets;
pub mod service;

pub use api::{router, ApiError, ApiState};
pub use blob::{BlobError, BlobRef, BlobStore, FsBlobStore, HttpBlobStore};
pub use config::{load_config, load_config_from_env, Config};
pub use db::Database;
pub use error::{ConfigError, FilevertError, Result};
pub use files::{FileRegistry, StoredFile};
pub use job::{
    ConversionJob, JobEvent, JobEventBroadcaster, JobStatus, JobStore, JobStoreError, JobUpdate,
};
pub use orchestrator::{sweep_interrupted, Orchestrator, OrchestratorConfig};
pub use poller::{HttpStatusSource, PollError, PollUpdate, PollerConfig, StatusPoller, StatusSource};
pub use provider::{CloudConvertClient, CloudConvertConfig, ConversionProvider, ProviderError};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use service::{Caller, ConversionService, ServiceError};
