//! Error types for the platform client.

use thiserror::Error;

/// Errors that can occur when talking to the publishing platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// HTTP request failed (connection, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error reported by the platform API.
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// The requested object does not exist upstream.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Rate limited.
    #[error("rate limited{}", retry_after_secs.map(|s| format!(" (retry after {}s)", s)).unwrap_or_default())]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// Credential failed introspection or belongs to the wrong owner.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// Credential is valid but cannot act on the target channel.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Coarse classification of a platform failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Credential,
    Permission,
    InvalidParameters,
    RateLimited,
    Upstream,
}

impl ErrorKind {
    /// Classify a numeric API error code.
    pub fn from_code(code: i64) -> Self {
        match code {
            102 | 190 | 463 | 467 => Self::Credential,
            10 | 200..=299 => Self::Permission,
            100 => Self::InvalidParameters,
            4 | 17 | 32 | 613 => Self::RateLimited,
            _ => Self::Upstream,
        }
    }

    /// What an operator should do about this failure.
    pub fn hint(self) -> &'static str {
        match self {
            Self::Credential => "re-issue the access token and update HERALD_ACCESS_TOKEN",
            Self::Permission => {
                "grant the app publishing permissions on the channel, or use a token from a channel admin"
            }
            Self::InvalidParameters => {
                "check the caption length and that the image is a reachable JPEG or PNG"
            }
            Self::RateLimited => "wait for the platform rate window to reset; the next tick retries",
            Self::Upstream => "transient platform failure; the next eligible tick retries",
        }
    }
}

impl PlatformError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api { code, .. } => ErrorKind::from_code(*code),
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::InvalidCredential(_) => ErrorKind::Credential,
            Self::PermissionDenied(_) => ErrorKind::Permission,
            Self::Http(_) | Self::Json(_) | Self::NotFound(_) | Self::InvalidResponse(_) => {
                ErrorKind::Upstream
            }
        }
    }
}
