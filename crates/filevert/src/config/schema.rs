use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::DEFAULT_OWNER_HEADER;
use crate::orchestrator::OrchestratorConfig;
use crate::provider::cloudconvert::{DEFAULT_API_URL, DEFAULT_MAX_POLL_ATTEMPTS};
use crate::service::DEFAULT_MAX_UPLOAD_BYTES;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub files: FilesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Defaults to `~/.filevert/data/filevert.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Where file and result bytes are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Filesystem {
        /// Defaults to `~/.filevert/blobs`.
        #[serde(default)]
        root: Option<PathBuf>,
    },
    Http {
        base_url: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        token_file: Option<String>,
        #[serde(default)]
        token_env_var: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Filesystem { root: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_api_key_env_var")]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_api_key_env_var() -> Option<String> {
    Some("CLOUDCONVERT_API_KEY".to_string())
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_poll_attempts() -> u32 {
    DEFAULT_MAX_POLL_ATTEMPTS
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: default_api_key_env_var(),
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    #[serde(default = "default_terminal_write_attempts")]
    pub terminal_write_attempts: u32,
    #[serde(default = "default_terminal_write_backoff_ms")]
    pub terminal_write_backoff_ms: u64,
}

fn default_submit_timeout_secs() -> u64 {
    120
}

fn default_download_timeout_secs() -> u64 {
    300
}

fn default_store_timeout_secs() -> u64 {
    120
}

fn default_terminal_write_attempts() -> u32 {
    3
}

fn default_terminal_write_backoff_ms() -> u64 {
    200
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            submit_timeout_secs: default_submit_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            store_timeout_secs: default_store_timeout_secs(),
            terminal_write_attempts: default_terminal_write_attempts(),
            terminal_write_backoff_ms: default_terminal_write_backoff_ms(),
        }
    }
}

impl OrchestratorSettings {
    pub fn to_runtime(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            submit_timeout: Duration::from_secs(self.submit_timeout_secs),
            download_timeout: Duration::from_secs(self.download_timeout_secs),
            store_timeout: Duration::from_secs(self.store_timeout_secs),
            terminal_write_attempts: self.terminal_write_attempts,
            terminal_write_backoff: Duration::from_millis(self.terminal_write_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_true")]
    pub sweep_on_startup: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            sweep_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Header carrying the caller id set by the upstream authenticator.
    #[serde(default = "default_owner_header")]
    pub owner_header: String,
}

fn default_owner_header() -> String {
    DEFAULT_OWNER_HEADER.to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            owner_header: default_owner_header(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}
