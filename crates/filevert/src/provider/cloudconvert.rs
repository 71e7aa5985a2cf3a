//! CloudConvert v2 client.
//!
//! A conversion is one provider job with three named tasks:
//! `import-source` (`import/upload`) → `convert-source` (`convert`) →
//! `export-result` (`export/url`).

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::{ProviderError, ProviderPhase, Result};
use super::{ConversionProvider, SubmittedJob, UploadForm};
use crate::sanitize::{redact_url, truncate_body};

pub const DEFAULT_API_URL: &str = "https://api.cloudconvert.com/v2";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

const IMPORT_TASK: &str = "import-source";
const CONVERT_TASK: &str = "convert-source";
const EXPORT_TASK: &str = "export-result";

/// Connection settings for [`CloudConvertClient`].
#[derive(Debug)]
pub struct CloudConvertConfig {
    pub api_url: String,
    pub api_key: SecretString,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    /// Per-request timeout for API calls (submit, status).
    pub request_timeout: Duration,
}

impl CloudConvertConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// ─── Wire types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct JobData {
    id: String,
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    tasks: Vec<TaskData>,
}

#[derive(Debug, Deserialize)]
struct TaskData {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ImportResult {
    form: ImportForm,
}

#[derive(Debug, Deserialize)]
struct ImportForm {
    url: String,
    #[serde(default)]
    parameters: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ExportResult {
    #[serde(default)]
    files: Vec<ExportedFile>,
}

#[derive(Debug, Deserialize)]
struct ExportedFile {
    url: String,
}

impl JobData {
    fn task(&self, name: &str) -> Option<&TaskData> {
        self.tasks.iter().find(|t| t.name.as_deref() == Some(name))
    }
}

/// What one status response means for the wait loop.
#[derive(Debug, PartialEq, Eq)]
enum PollOutcome {
    Pending,
    Finished(String),
    Failed(String),
}

fn submit_body(source_format: &str, target_format: &str) -> Value {
    json!({
        "tasks": {
            IMPORT_TASK: {
                "operation": "import/upload"
            },
            CONVERT_TASK: {
                "operation": "convert",
                "input": IMPORT_TASK,
                "input_format": source_format.to_ascii_lowercase(),
                "output_format": target_format.to_ascii_lowercase()
            },
            EXPORT_TASK: {
                "operation": "export/url",
                "input": CONVERT_TASK
            }
        },
        "tag": "filevert"
    })
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn upload_form(job: &JobData) -> Result<UploadForm> {
    let result = job
        .task(IMPORT_TASK)
        .and_then(|t| t.result.clone())
        .ok_or_else(|| {
            ProviderError::MalformedResponse(format!("job {} has no upload form", job.id))
        })?;
    let import: ImportResult = serde_json::from_value(result).map_err(|e| {
        ProviderError::MalformedResponse(format!("job {} upload form: {}", job.id, e))
    })?;

    Ok(UploadForm {
        url: import.form.url,
        parameters: import
            .form
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), form_value(v)))
            .collect(),
    })
}

fn evaluate(job: &JobData) -> Result<PollOutcome> {
    let failed_task = job
        .tasks
        .iter()
        .find(|t| t.status.as_deref() == Some("error"));

    if job.status == "error" || failed_task.is_some() {
        let message = failed_task
            .and_then(|t| t.message.clone())
            .or_else(|| job.message.clone())
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "Conversion failed".to_string());
        return Ok(PollOutcome::Failed(message));
    }

    if job.status != "finished" {
        return Ok(PollOutcome::Pending);
    }

    let result = job
        .task(EXPORT_TASK)
        .and_then(|t| t.result.clone())
        .ok_or_else(|| {
            ProviderError::MalformedResponse(format!("job {} finished without export", job.id))
        })?;
    let export: ExportResult = serde_json::from_value(result).map_err(|e| {
        ProviderError::MalformedResponse(format!("job {} export result: {}", job.id, e))
    })?;

    export
        .files
        .into_iter()
        .next()
        .map(|f| PollOutcome::Finished(f.url))
        .ok_or_else(|| {
            ProviderError::MalformedResponse(format!("job {} finished without files", job.id))
        })
}

// ─── Client ─────────────────────────────────────────────────────────────────

fn create_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("Failed to create HTTP client: {}", e)))
}

fn request_error(phase: ProviderPhase, e: reqwest::Error) -> ProviderError {
    ProviderError::Request {
        phase,
        message: e.without_url().to_string(),
    }
}

async fn ensure_success(
    phase: ProviderPhase,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Http {
        phase,
        status: status.as_u16(),
        body: truncate_body(&body),
    })
}

async fn parse_job(phase: ProviderPhase, response: reqwest::Response) -> Result<JobData> {
    let envelope: Envelope<JobData> = response.json().await.map_err(|e| {
        ProviderError::MalformedResponse(format!("{} response: {}", phase, e.without_url()))
    })?;
    Ok(envelope.data)
}

/// HTTP client for the CloudConvert v2 API.
pub struct CloudConvertClient {
    api: Client,
    transfer: Client,
    config: CloudConvertConfig,
}

impl CloudConvertClient {
    pub fn new(config: CloudConvertConfig) -> Result<Self> {
        if config.api_key.expose_secret().trim().is_empty() {
            return Err(ProviderError::NotConfigured(
                "CloudConvert API key is empty".to_string(),
            ));
        }
        if config.max_poll_attempts == 0 {
            return Err(ProviderError::NotConfigured(
                "max_poll_attempts must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            api: create_http_client(config.request_timeout)?,
            transfer: create_http_client(TRANSFER_TIMEOUT)?,
            config: CloudConvertConfig {
                api_url: config.api_url.trim_end_matches('/').to_string(),
                ..config
            },
        })
    }

    fn jobs_url(&self) -> String {
        format!("{}/jobs", self.config.api_url)
    }

    async fn fetch_job(&self, provider_job_id: &str) -> Result<JobData> {
        let response = self
            .api
            .get(format!("{}/{}", self.jobs_url(), provider_job_id))
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| request_error(ProviderPhase::Poll, e))?;
        let response = ensure_success(ProviderPhase::Poll, response).await?;
        parse_job(ProviderPhase::Poll, response).await
    }
}

#[async_trait]
impl ConversionProvider for CloudConvertClient {
    async fn submit(&self, source_format: &str, target_format: &str) -> Result<SubmittedJob> {
        let response = self
            .api
            .post(self.jobs_url())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&submit_body(source_format, target_format))
            .send()
            .await
            .map_err(|e| request_error(ProviderPhase::Submit, e))?;
        let response = ensure_success(ProviderPhase::Submit, response).await?;
        let job = parse_job(ProviderPhase::Submit, response).await?;

        let upload = upload_form(&job)?;
        info!(
            "Submitted provider job {} ({} -> {})",
            job.id, source_format, target_format
        );

        Ok(SubmittedJob {
            provider_job_id: job.id,
            upload,
        })
    }

    async fn upload(&self, form: &UploadForm, file_name: &str, bytes: Vec<u8>) -> Result<()> {
        let len = bytes.len();
        let mut multipart = Form::new();
        for (key, value) in &form.parameters {
            multipart = multipart.text(key.clone(), value.clone());
        }
        // The file part must come after every provider field.
        multipart = multipart.part("file", Part::bytes(bytes).file_name(file_name.to_string()));

        let response = self
            .transfer
            .post(&form.url)
            .multipart(multipart)
            .send()
            .await
            .map_err(|e| request_error(ProviderPhase::Upload, e))?;
        ensure_success(ProviderPhase::Upload, response).await?;

        debug!("Uploaded {} bytes to {}", len, redact_url(&form.url));
        Ok(())
    }

    async fn wait_for_result(&self, provider_job_id: &str) -> Result<String> {
        let max_attempts = self.config.max_poll_attempts;

        for attempt in 1..=max_attempts {
            tokio::time::sleep(self.config.poll_interval).await;

            let job = self.fetch_job(provider_job_id).await?;
            match evaluate(&job)? {
                PollOutcome::Finished(url) => {
                    info!(
                        "Provider job {} finished after {} status checks",
                        provider_job_id, attempt
                    );
                    return Ok(url);
                }
                PollOutcome::Failed(message) => {
                    warn!("Provider job {} failed: {}", provider_job_id, message);
                    return Err(ProviderError::Conversion { message });
                }
                PollOutcome::Pending => {
                    debug!(
                        "Provider job {} is '{}' (check {}/{})",
                        provider_job_id, job.status, attempt, max_attempts
                    );
                }
            }
        }

        Err(ProviderError::Timeout {
            attempts: max_attempts,
            waited: self
                .config
                .poll_interval
                .checked_mul(max_attempts)
                .unwrap_or(Duration::MAX),
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .transfer
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(ProviderPhase::Download, e))?;
        let response = ensure_success(ProviderPhase::Download, response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| request_error(ProviderPhase::Download, e))?;

        debug!("Downloaded {} bytes from {}", bytes.len(), redact_url(url));
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(value: Value) -> JobData {
        serde_json::from_value::<Envelope<JobData>>(value)
            .unwrap()
            .data
    }

    #[test]
    fn test_submit_body_graph() {
        let body = submit_body("PDF", "DOCX");
        assert_eq!(body["tasks"][IMPORT_TASK]["operation"], "import/upload");
        assert_eq!(body["tasks"][CONVERT_TASK]["input"], IMPORT_TASK);
        assert_eq!(body["tasks"][CONVERT_TASK]["input_format"], "pdf");
        assert_eq!(body["tasks"][CONVERT_TASK]["output_format"], "docx");
        assert_eq!(body["tasks"][EXPORT_TASK]["input"], CONVERT_TASK);
    }

    #[test]
    fn test_upload_form_keeps_parameter_order() {
        let data = job(json!({
            "data": {
                "id": "job-1",
                "status": "waiting",
                "tasks": [{
                    "name": IMPORT_TASK,
                    "status": "waiting",
                    "result": {
                        "form": {
                            "url": "https://upload.example.com/",
                            "parameters": {
                                "key": "abc/${filename}",
                                "acl": "private",
                                "expires": 3600,
                                "signature": "sig"
                            }
                        }
                    }
                }]
            }
        }));

        let form = upload_form(&data).unwrap();
        assert_eq!(form.url, "https://upload.example.com/");
        let keys: Vec<&str> = form.parameters.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["key", "acl", "expires", "signature"]);
        assert_eq!(form.parameters[2].1, "3600");
    }

    #[test]
    fn test_upload_form_missing() {
        let data = job(json!({"data": {"id": "job-1", "status": "waiting", "tasks": []}}));
        assert!(matches!(
            upload_form(&data),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_evaluate_pending() {
        let data = job(json!({"data": {"id": "j", "status": "processing", "tasks": []}}));
        assert_eq!(evaluate(&data).unwrap(), PollOutcome::Pending);
    }

    #[test]
    fn test_evaluate_finished() {
        let data = job(json!({
            "data": {
                "id": "j",
                "status": "finished",
                "tasks": [
                    {"name": CONVERT_TASK, "status": "finished"},
                    {"name": EXPORT_TASK, "status": "finished", "result": {
                        "files": [{"filename": "out.docx", "url": "https://dl.example.com/out.docx"}]
                    }}
                ]
            }
        }));
        assert_eq!(
            evaluate(&data).unwrap(),
            PollOutcome::Finished("https://dl.example.com/out.docx".to_string())
        );
    }

    #[test]
    fn test_evaluate_finished_without_files_is_malformed() {
        let data = job(json!({
            "data": {
                "id": "j",
                "status": "finished",
                "tasks": [{"name": EXPORT_TASK, "status": "finished", "result": {"files": []}}]
            }
        }));
        assert!(matches!(
            evaluate(&data),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_evaluate_error_uses_task_message() {
        let data = job(json!({
            "data": {
                "id": "j",
                "status": "error",
                "message": "Job failed",
                "tasks": [
                    {"name": IMPORT_TASK, "status": "finished"},
                    {"name": CONVERT_TASK, "status": "error", "message": "unsupported codec"}
                ]
            }
        }));
        assert_eq!(
            evaluate(&data).unwrap(),
            PollOutcome::Failed("unsupported codec".to_string())
        );
    }

    #[test]
    fn test_evaluate_error_falls_back_to_job_message() {
        let data = job(json!({
            "data": {"id": "j", "status": "error", "message": "quota exceeded", "tasks": []}
        }));
        assert_eq!(
            evaluate(&data).unwrap(),
            PollOutcome::Failed("quota exceeded".to_string())
        );
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let config = CloudConvertConfig::new(SecretString::from(""));
        assert!(matches!(
            CloudConvertClient::new(config),
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
