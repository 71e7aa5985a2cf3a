//! Object storage over plain HTTP (`GET`/`PUT`/`DELETE {base_url}/{key}`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};

use super::{generate_key, validate_key, BlobError, BlobRef, BlobStore};
use crate::sanitize::{redact_url, truncate_body};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct HttpBlobStore {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpBlobStore {
    /// Creates a store rooted at `base_url`. `token` is sent as a bearer
    /// credential when present.
    pub fn new(base_url: &str, token: Option<SecretString>) -> Result<Self, BlobError> {
        Self::with_timeout(base_url, token, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        token: Option<SecretString>,
        request_timeout: Duration,
    ) -> Result<Self, BlobError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(BlobError::Config(format!(
                "object storage URL must be http(s): {}",
                redact_url(&base_url)
            )));
        }

        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| BlobError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn url_for(&self, key: &str) -> Result<String, BlobError> {
        validate_key(key)?;
        Ok(format!("{}/{}", self.base_url, key))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn send(
        &self,
        key: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, BlobError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| BlobError::Request {
                key: key.to_string(),
                message: e.without_url().to_string(),
            })
    }
}

async fn error_for(key: &str, response: reqwest::Response) -> BlobError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    BlobError::Http {
        key: key.to_string(),
        status: status.as_u16(),
        body: truncate_body(&body),
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn fetch(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError> {
        let key = blob.key();
        let url = self.url_for(key)?;
        let response = self.send(key, self.client.get(&url)).await?;

        match response.status() {
            status if status.is_success() => {
                let bytes = response.bytes().await.map_err(|e| BlobError::Request {
                    key: key.to_string(),
                    message: e.without_url().to_string(),
                })?;
                Ok(bytes.to_vec())
            }
            StatusCode::NOT_FOUND => Err(BlobError::NotFound(key.to_string())),
            _ => Err(error_for(key, response).await),
        }
    }

    async fn store(
        &self,
        namespace: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<BlobRef, BlobError> {
        let key = generate_key(namespace, name);
        let url = self.url_for(&key)?;
        let len = bytes.len();

        let request = self
            .client
            .put(&url)
            .header(header::IF_NONE_MATCH, "*")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes);
        let response = self.send(&key, request).await?;

        match response.status() {
            status if status.is_success() => {
                log::debug!("Stored {} bytes at blob '{}'", len, key);
                Ok(BlobRef::new(key))
            }
            StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
                Err(BlobError::AlreadyExists(key))
            }
            _ => Err(error_for(&key, response).await),
        }
    }

    async fn delete(&self, blob: &BlobRef) -> Result<(), BlobError> {
        let key = blob.key();
        let url = self.url_for(key)?;
        let response = self.send(key, self.client.delete(&url)).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(BlobError::NotFound(key.to_string())),
            _ => Err(error_for(key, response).await),
        }
    }
}
