//! Blob transfer: fetching and storing file bytes in object storage.
//!
//! Every `store` produces a fresh key of the form
//! `{namespace}/{uuid}/{sanitised name}`, so an existing object is never
//! overwritten.

pub mod fs;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use fs::FsBlobStore;
pub use http::HttpBlobStore;

/// Namespace for files uploaded by users.
pub const UPLOADS_NAMESPACE: &str = "uploads";

/// Namespace for conversion results persisted by the orchestrator.
pub const CONVERTED_NAMESPACE: &str = "converted";

/// Opaque reference to a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn key(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from blob storage backends.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid blob key '{0}'")]
    InvalidKey(String),

    #[error("IO error for blob '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Object storage returned HTTP {status} for '{key}': {body}")]
    Http {
        key: String,
        status: u16,
        body: String,
    },

    #[error("Object storage request failed for '{key}': {message}")]
    Request { key: String, message: String },

    #[error("Invalid object storage configuration: {0}")]
    Config(String),
}

/// Object storage used for source files and conversion results.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetches the bytes behind `blob`. Fails with [`BlobError::NotFound`]
    /// if the object is absent.
    async fn fetch(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError>;

    /// Stores `bytes` under a fresh key in `namespace`, derived from `name`.
    async fn store(&self, namespace: &str, name: &str, bytes: Vec<u8>)
        -> Result<BlobRef, BlobError>;

    /// Removes the object behind `blob`.
    async fn delete(&self, blob: &BlobRef) -> Result<(), BlobError>;
}

/// Reduces a user-supplied file name to a single safe path component.
pub fn sanitize_blob_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '?' | '#' | '%' | '"' | '<' | '>' | '|' | '*' | ':') {
                '_'
            } else {
                c
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Builds a fresh, unique key for `name` in `namespace`.
pub fn generate_key(namespace: &str, name: &str) -> String {
    format!("{}/{}/{}", namespace, Uuid::new_v4(), sanitize_blob_name(name))
}

/// Rejects keys that could escape the storage root.
pub(crate) fn validate_key(key: &str) -> Result<(), BlobError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}
