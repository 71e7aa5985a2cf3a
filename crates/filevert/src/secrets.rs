//! Credential resolution for the provider API key and the object storage token.
//!
//! A credential may be given in the config file directly, as a path to a
//! file holding it (Docker secrets), or as the name of an environment
//! variable. The first non-empty source wins, in that order.

use std::fs;

use secrecy::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No credential source configured (need a value, a file path, or an env var name)")]
    NoSourceProvided,

    #[error("Failed to read credential from file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Credential from {origin} is empty")]
    Empty { origin: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolves a credential from the first configured source.
///
/// File contents and env values are trimmed; an empty result is an error
/// rather than a blank credential.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = non_empty(direct) {
        return Ok(SecretString::from(value.trim().to_string()));
    }

    if let Some(path) = non_empty(file_path) {
        let expanded = expand_home(path.trim());
        let content = fs::read_to_string(&expanded).map_err(|source| SecretError::FileRead {
            path: expanded.clone(),
            source,
        })?;
        let content = content.trim();
        if content.is_empty() {
            return Err(SecretError::Empty {
                origin: format!("file '{}'", expanded),
            });
        }
        return Ok(SecretString::from(content.to_string()));
    }

    if let Some(name) = non_empty(env_var) {
        let name = name.trim();
        return match std::env::var(name) {
            Ok(value) if value.trim().is_empty() => Err(SecretError::Empty {
                origin: format!("environment variable '{}'", name),
            }),
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but no configured source yields `None`.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Expands a leading `~` to the current user's home directory.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
