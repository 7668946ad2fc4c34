//! Error types for the scheduler.

use herald_platform::{ErrorKind, PlatformError};
use thiserror::Error;

use crate::ChannelStatus;

/// Errors from the content repository or configuration store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Item not found.
    #[error("item not found: {0}")]
    NotFound(String),

    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A channel state change the lifecycle does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {action} an item whose channel status is {from}")]
pub struct InvalidTransition {
    pub from: ChannelStatus,
    pub action: &'static str,
}

/// Errors that can occur while publishing an item.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Misconfiguration; fatal to the current operation only.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("credential error: {message} (hint: {hint})")]
    Credential { message: String, hint: &'static str },

    #[error("permission error: {message} (hint: {hint})")]
    Permission { message: String, hint: &'static str },

    #[error("rate limited: {message} (hint: {hint})")]
    RateLimited { message: String, hint: &'static str },

    /// Invalid input, detected before any network call or rejected upstream.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("upstream error: {message} (hint: {hint})")]
    Upstream { message: String, hint: &'static str },

    /// The item already has a post on the channel.
    #[error("item {0} is already published")]
    AlreadyPublished(String),

    /// The channel already got its `max_per_day` posts today.
    #[error("daily limit of {0} posts reached")]
    DailyLimitReached(u32),

    /// Another attempt holds the item's lease.
    #[error("item {0} has a publish attempt in progress")]
    InProgress(String),

    /// Repository failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl PublishError {
    /// Duplicate-guard no-ops are not failures of the item.
    pub fn is_duplicate_guard(&self) -> bool {
        matches!(self, Self::AlreadyPublished(_) | Self::InProgress(_))
    }
}

impl From<PlatformError> for PublishError {
    fn from(err: PlatformError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        let hint = kind.hint();
        match kind {
            ErrorKind::Credential => Self::Credential { message, hint },
            ErrorKind::Permission => Self::Permission { message, hint },
            ErrorKind::RateLimited => Self::RateLimited { message, hint },
            ErrorKind::InvalidParameters => Self::Validation(format!("{} (hint: {})", message, hint)),
            ErrorKind::Upstream => Self::Upstream { message, hint },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_errors_map_to_taxonomy() {
        let err: PublishError = PlatformError::Api {
            code: 190,
            message: "expired".into(),
        }
        .into();
        assert!(matches!(err, PublishError::Credential { .. }));

        let err: PublishError = PlatformError::Api {
            code: 100,
            message: "bad param".into(),
        }
        .into();
        assert!(matches!(err, PublishError::Validation(_)));

        let err: PublishError = PlatformError::RateLimited {
            retry_after_secs: None,
        }
        .into();
        assert!(matches!(err, PublishError::RateLimited { .. }));

        let err: PublishError = PlatformError::PermissionDenied("no".into()).into();
        assert!(matches!(err, PublishError::Permission { .. }));
    }

    #[test]
    fn test_hint_in_message() {
        let err: PublishError = PlatformError::Api {
            code: 1,
            message: "unknown".into(),
        }
        .into();
        assert!(err.to_string().contains("hint:"));
    }

    #[test]
    fn test_duplicate_guards() {
        assert!(PublishError::AlreadyPublished("a".into()).is_duplicate_guard());
        assert!(PublishError::InProgress("a".into()).is_duplicate_guard());
        assert!(!PublishError::Validation("a".into()).is_duplicate_guard());
    }
}
