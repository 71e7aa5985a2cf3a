//! Conversion provider: the external service that performs format conversion.
//!
//! The protocol has four steps. `submit` creates a provider job and returns
//! where to upload the source. `upload` sends the source bytes. Then
//! `wait_for_result` polls until the provider reports a terminal outcome, and
//! `download` fetches the produced file.

pub mod cloudconvert;
pub mod error;

use async_trait::async_trait;

pub use cloudconvert::{CloudConvertClient, CloudConvertConfig};
pub use error::{ProviderError, ProviderPhase, Result};

/// Upload destination for the source file, as issued by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadForm {
    pub url: String,
    /// Form fields in the order the provider listed them. Sent verbatim.
    pub parameters: Vec<(String, String)>,
}

/// A provider job accepted by `submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub provider_job_id: String,
    pub upload: UploadForm,
}

/// Client for a remote conversion service.
#[async_trait]
pub trait ConversionProvider: Send + Sync {
    /// Creates a provider job converting `source_format` into `target_format`.
    async fn submit(&self, source_format: &str, target_format: &str) -> Result<SubmittedJob>;

    /// Uploads the source bytes to the destination returned by `submit`.
    async fn upload(&self, form: &UploadForm, file_name: &str, bytes: Vec<u8>) -> Result<()>;

    /// Polls the provider job until it finishes, returning the result URL.
    async fn wait_for_result(&self, provider_job_id: &str) -> Result<String>;

    /// Downloads the converted file.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}
