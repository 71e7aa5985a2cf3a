use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::blob::{BlobStore, FsBlobStore, HttpBlobStore};
use crate::config::schema::{Config, StorageConfig};
use crate::db::default_database_path;
use crate::error::ConfigError;
use crate::provider::CloudConvertConfig;
use crate::secrets::{resolve_secret, resolve_secret_optional};

/// Environment variables that override the config file.
pub const ENV_BIND: &str = "FILEVERT_BIND";
pub const ENV_DATABASE_PATH: &str = "FILEVERT_DATABASE_PATH";
pub const ENV_STORAGE_ROOT: &str = "FILEVERT_STORAGE_ROOT";
pub const ENV_STORAGE_URL: &str = "FILEVERT_STORAGE_URL";
pub const ENV_PROVIDER_API_URL: &str = "FILEVERT_PROVIDER_API_URL";
pub const ENV_OWNER_HEADER: &str = "FILEVERT_OWNER_HEADER";
pub const ENV_MAX_UPLOAD_BYTES: &str = "FILEVERT_MAX_UPLOAD_BYTES";
pub const ENV_SWEEP_ON_STARTUP: &str = "FILEVERT_SWEEP_ON_STARTUP";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    info!("Loading configuration from {}", path.display());
    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    finish(config, |name| std::env::var(name).ok())
}

/// Defaults plus environment overrides, for running without a config file.
pub fn load_config_from_env() -> Result<Config, ConfigError> {
    finish(Config::default(), |name| std::env::var(name).ok())
}

fn finish<F>(mut config: Config, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    apply_env_overrides(&mut config, lookup)?;
    validate_config(&config)?;
    Ok(config)
}

/// Overlays `FILEVERT_*` variables onto `config`. Blank values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(bind) = get(ENV_BIND) {
        config.server.bind = bind;
    }
    if let Some(path) = get(ENV_DATABASE_PATH) {
        config.database.path = Some(PathBuf::from(path));
    }
    if let Some(base_url) = get(ENV_STORAGE_URL) {
        let (token, token_file, token_env_var) = match &config.storage {
            StorageConfig::Http {
                token,
                token_file,
                token_env_var,
                ..
            } => (token.clone(), token_file.clone(), token_env_var.clone()),
            StorageConfig::Filesystem { .. } => (None, None, None),
        };
        config.storage = StorageConfig::Http {
            base_url,
            token,
            token_file,
            token_env_var,
        };
    } else if let Some(root) = get(ENV_STORAGE_ROOT) {
        config.storage = StorageConfig::Filesystem {
            root: Some(PathBuf::from(root)),
        };
    }
    if let Some(api_url) = get(ENV_PROVIDER_API_URL) {
        config.provider.api_url = api_url;
    }
    if let Some(header) = get(ENV_OWNER_HEADER) {
        config.api.owner_header = header;
    }
    if let Some(raw) = get(ENV_MAX_UPLOAD_BYTES) {
        config.files.max_upload_bytes = raw.parse().map_err(|_| ConfigError::InvalidEnv {
            name: ENV_MAX_UPLOAD_BYTES.to_string(),
            reason: format!("'{}' is not a byte count", raw),
        })?;
    }
    if let Some(raw) = get(ENV_SWEEP_ON_STARTUP) {
        config.recovery.sweep_on_startup = parse_bool(&raw).ok_or_else(|| ConfigError::InvalidEnv {
            name: ENV_SWEEP_ON_STARTUP.to_string(),
            reason: format!("'{}' is not a boolean", raw),
        })?;
    }

    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.bind.parse::<std::net::SocketAddr>().is_err() {
        return Err(invalid(format!(
            "server.bind '{}' is not a socket address",
            config.server.bind
        )));
    }

    if let StorageConfig::Http { base_url, .. } = &config.storage {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(invalid("storage.base_url must be an http(s) URL"));
        }
    }

    let provider = &config.provider;
    if !(provider.api_url.starts_with("http://") || provider.api_url.starts_with("https://")) {
        return Err(invalid("provider.api_url must be an http(s) URL"));
    }
    if provider.poll_interval_secs == 0 {
        return Err(invalid("provider.poll_interval_secs must be at least 1"));
    }
    if provider.max_poll_attempts == 0 {
        return Err(invalid("provider.max_poll_attempts must be at least 1"));
    }

    let orchestrator = &config.orchestrator;
    if orchestrator.submit_timeout_secs == 0
        || orchestrator.download_timeout_secs == 0
        || orchestrator.store_timeout_secs == 0
    {
        return Err(invalid("orchestrator timeouts must be at least 1 second"));
    }
    if orchestrator.terminal_write_attempts == 0 {
        return Err(invalid("orchestrator.terminal_write_attempts must be at least 1"));
    }

    let header = config.api.owner_header.trim();
    if header.is_empty() || axum::http::HeaderName::from_bytes(header.as_bytes()).is_err() {
        return Err(invalid(format!(
            "api.owner_header '{}' is not a valid header name",
            config.api.owner_header
        )));
    }

    if config.files.max_upload_bytes == 0 {
        return Err(invalid("files.max_upload_bytes must be positive"));
    }

    Ok(())
}

/// Database location: the configured path or the per-user default.
pub fn database_path(config: &Config) -> Result<PathBuf, ConfigError> {
    config
        .database
        .path
        .clone()
        .or_else(default_database_path)
        .ok_or_else(|| invalid("database.path is not set and no home directory was found"))
}

/// Provider client settings with the API key resolved.
pub fn provider_config(config: &Config) -> Result<CloudConvertConfig, ConfigError> {
    let provider = &config.provider;
    let api_key = resolve_secret(
        provider.api_key.as_deref(),
        provider.api_key_file.as_deref(),
        provider.api_key_env_var.as_deref(),
    )?;

    let mut resolved = CloudConvertConfig::new(api_key);
    resolved.api_url = provider.api_url.clone();
    resolved.poll_interval = Duration::from_secs(provider.poll_interval_secs);
    resolved.max_poll_attempts = provider.max_poll_attempts;
    resolved.request_timeout = Duration::from_secs(provider.request_timeout_secs);
    Ok(resolved)
}

/// Builds the configured blob backend.
pub fn blob_store(config: &Config) -> Result<Arc<dyn BlobStore>, ConfigError> {
    match &config.storage {
        StorageConfig::Filesystem { root } => {
            let root = match root {
                Some(root) => root.clone(),
                None => dirs::home_dir()
                    .map(|home| home.join(".filevert").join("blobs"))
                    .ok_or_else(|| invalid("storage.root is not set and no home directory was found"))?,
            };
            info!("Using filesystem blob storage at {}", root.display());
            Ok(Arc::new(FsBlobStore::new(root)))
        }
        StorageConfig::Http {
            base_url,
            token,
            token_file,
            token_env_var,
        } => {
            let token = resolve_secret_optional(
                token.as_deref(),
                token_file.as_deref(),
                token_env_var.as_deref(),
            )?;
            info!("Using HTTP blob storage at {}", base_url);
            let store = HttpBlobStore::new(base_url, token).map_err(|e| invalid(e.to_string()))?;
            Ok(Arc::new(store))
        }
    }
}
