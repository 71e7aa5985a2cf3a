//! Conversion provider error types.

use std::time::Duration;

use thiserror::Error;

/// The protocol step a provider call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderPhase {
    Submit,
    Upload,
    Poll,
    Download,
}

impl std::fmt::Display for ProviderPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderPhase::Submit => write!(f, "submit"),
            ProviderPhase::Upload => write!(f, "upload"),
            ProviderPhase::Poll => write!(f, "status"),
            ProviderPhase::Download => write!(f, "download"),
        }
    }
}

/// Errors that can occur while talking to the conversion provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Non-2xx response. `body` is already truncated.
    #[error("Provider {phase} request failed with HTTP {status}: {body}")]
    Http {
        phase: ProviderPhase,
        status: u16,
        body: String,
    },

    /// Transport failure (connect, TLS, timeout of a single request).
    #[error("Provider {phase} request failed: {message}")]
    Request {
        phase: ProviderPhase,
        message: String,
    },

    /// The provider reported the conversion as failed.
    #[error("{message}")]
    Conversion { message: String },

    /// The provider never reached a terminal state.
    #[error("Conversion timed out after {attempts} status checks ({waited:?})")]
    Timeout { attempts: u32, waited: Duration },

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Conversion provider is not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_error_is_verbatim() {
        let err = ProviderError::Conversion {
            message: "unsupported codec".to_string(),
        };
        assert_eq!(err.to_string(), "unsupported codec");
    }

    #[test]
    fn test_http_error_names_phase() {
        let err = ProviderError::Http {
            phase: ProviderPhase::Upload,
            status: 403,
            body: "denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Provider upload request failed with HTTP 403: denied"
        );
    }

    #[test]
    fn test_timeout_mentions_timeout() {
        let err = ProviderError::Timeout {
            attempts: 60,
            waited: Duration::from_secs(300),
        };
        assert_eq!(err.to_string(), "Conversion timed out after 60 status checks (300s)");
    }
}
