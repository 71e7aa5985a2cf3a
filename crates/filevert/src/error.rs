use std::path::PathBuf;
use thiserror::Error;

use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum FilevertError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Job store error: {0}")]
    Jobs(#[from] crate::job::JobStoreError),

    #[error("Blob storage error: {0}")]
    Blob(#[from] crate::blob::BlobError),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error("Service error: {0}")]
    Service(#[from] crate::service::ServiceError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid value for {name}: {reason}")]
    InvalidEnv { name: String, reason: String },

    #[error("Credential error: {0}")]
    Secret(#[from] SecretError),
}

pub type Result<T> = std::result::Result<T, FilevertError>;
