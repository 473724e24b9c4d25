//! Provider error types and their classification.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use vgen_media::MediaError;
use vgen_models::ErrorKind;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider}: rate limited")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    #[error("{provider}: timed out after {secs} seconds")]
    Timeout { provider: String, secs: u64 },

    #[error("{provider}: unavailable: {message}")]
    Unavailable { provider: String, message: String },

    #[error("{provider}: invalid response: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("{provider}: authentication failed: {message}")]
    Auth { provider: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),
}

impl ProviderError {
    pub fn timeout(provider: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            provider: provider.into(),
            secs: after.as_secs(),
        }
    }

    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn invalid_response(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Classify a non-success HTTP status.
    pub fn from_http_status(
        provider: impl Into<String>,
        status: StatusCode,
        body: impl Into<String>,
        retry_after_secs: Option<u64>,
    ) -> Self {
        let provider = provider.into();
        let mut message = body.into();
        message.truncate(500);

        match status {
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited {
                provider,
                retry_after_secs,
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Auth { provider, message },
            StatusCode::REQUEST_TIMEOUT => Self::Timeout { provider, secs: 0 },
            s if s.is_server_error() => Self::Unavailable {
                provider,
                message: format!("HTTP {}: {}", s.as_u16(), message),
            },
            s => Self::InvalidResponse {
                provider,
                message: format!("HTTP {}: {}", s.as_u16(), message),
            },
        }
    }

    /// Classify a transport-level failure.
    pub fn from_transport(provider: impl Into<String>, err: reqwest::Error) -> Self {
        let provider = provider.into();
        if err.is_timeout() {
            Self::Timeout { provider, secs: 0 }
        } else if err.is_connect() {
            Self::Unavailable {
                provider,
                message: err.to_string(),
            }
        } else if err.is_decode() {
            Self::InvalidResponse {
                provider,
                message: err.to_string(),
            }
        } else {
            Self::Network(err)
        }
    }

    /// Error taxonomy bucket.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::Timeout { .. }
            | ProviderError::Unavailable { .. }
            | ProviderError::Network(_) => ErrorKind::Transient,
            ProviderError::InvalidResponse { .. } | ProviderError::Json(_) => ErrorKind::Malformed,
            ProviderError::Auth { .. } | ProviderError::Config(_) | ProviderError::Io(_) => {
                ErrorKind::Fatal
            }
            ProviderError::Media(e) => match e {
                MediaError::FfmpegNotFound | MediaError::FfprobeNotFound => ErrorKind::Fatal,
                MediaError::Timeout(_) => ErrorKind::Transient,
                _ => ErrorKind::Malformed,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Short machine-readable code for task error records.
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::Timeout { .. } => "timeout",
            ProviderError::Unavailable { .. } => "unavailable",
            ProviderError::InvalidResponse { .. } => "invalid_response",
            ProviderError::Auth { .. } => "auth",
            ProviderError::Config(_) => "config",
            ProviderError::Network(_) => "network",
            ProviderError::Json(_) => "invalid_json",
            ProviderError::Io(_) => "io",
            ProviderError::Media(_) => "media",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let rl = ProviderError::from_http_status("p", StatusCode::TOO_MANY_REQUESTS, "", Some(3));
        assert!(matches!(
            rl,
            ProviderError::RateLimited {
                retry_after_secs: Some(3),
                ..
            }
        ));
        assert!(rl.is_retryable());

        let down = ProviderError::from_http_status("p", StatusCode::BAD_GATEWAY, "oops", None);
        assert_eq!(down.kind(), ErrorKind::Transient);

        let auth = ProviderError::from_http_status("p", StatusCode::UNAUTHORIZED, "bad key", None);
        assert_eq!(auth.kind(), ErrorKind::Fatal);

        let bad = ProviderError::from_http_status("p", StatusCode::BAD_REQUEST, "nope", None);
        assert_eq!(bad.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_media_error_classification() {
        assert_eq!(
            ProviderError::from(MediaError::FfprobeNotFound).kind(),
            ErrorKind::Fatal
        );
        assert_eq!(
            ProviderError::from(MediaError::InvalidMedia("x".into())).kind(),
            ErrorKind::Malformed
        );
    }

    #[test]
    fn test_body_truncated() {
        let long = "x".repeat(2000);
        let err = ProviderError::from_http_status("p", StatusCode::BAD_REQUEST, long, None);
        assert!(err.to_string().len() < 600);
    }
}
