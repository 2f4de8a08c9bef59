//! Error types for avd-ops
//!
//! Provides structured error types for convergence, the ARM transport,
//! authentication, settings handling and the dashboard.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    // =========================================================================
    // Authentication Errors
    // =========================================================================
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    // =========================================================================
    // Provider Errors
    // =========================================================================
    #[error("Provider rejected request ({status} {code}): {message}")]
    ProviderRejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("Timed out waiting for {operation} after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Operation {operation} failed: {reason}")]
    OperationFailed { operation: String, reason: String },

    #[error("Invalid resource id '{id}': {reason}")]
    InvalidResourceId { id: String, reason: String },

    // =========================================================================
    // Transport / Parse Errors
    // =========================================================================
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take when an error surfaces at a retry boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry with exponential backoff
    RetryWithBackoff,
    /// Retry after a specific duration
    RetryAfter(Duration),
    /// Give up and report to the caller
    Fail,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            Error::ProviderUnavailable(_) => ErrorAction::RetryWithBackoff,

            Error::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                ErrorAction::RetryWithBackoff
            }

            // The provider throttles with 429; give it a breather
            Error::ProviderRejected { status: 429, .. } => {
                ErrorAction::RetryAfter(Duration::from_secs(10))
            }

            _ => ErrorAction::Fail,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::Fail)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self.action(), ErrorAction::RetryWithBackoff)
    }

    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Error::MissingField {
            field: field.into(),
        }
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::ProviderUnavailable("503 Service Unavailable".into());
        assert_eq!(err.action(), ErrorAction::RetryWithBackoff);

        let err = Error::ProviderRejected {
            status: 429,
            code: "TooManyRequests".into(),
            message: "slow down".into(),
        };
        assert_eq!(err.action(), ErrorAction::RetryAfter(Duration::from_secs(10)));

        let err = Error::ProviderRejected {
            status: 400,
            code: "InvalidParameter".into(),
            message: "bad sku".into(),
        };
        assert_eq!(err.action(), ErrorAction::Fail);

        let err = Error::Configuration("bad config".into());
        assert_eq!(err.action(), ErrorAction::Fail);
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::ProviderUnavailable("connection reset".into());
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let auth = Error::AuthenticationFailure("invalid_client".into());
        assert!(!auth.is_retryable());
        assert!(!auth.is_transient());

        let timeout = Error::Timeout {
            operation: "converge public-ip/avd-rg/pip-1".into(),
            after: Duration::from_secs(1),
        };
        assert!(!timeout.is_retryable());
    }

    #[test]
    fn test_missing_field_message() {
        let err = Error::missing_field("client_secret");
        assert_eq!(err.to_string(), "Missing required field: client_secret");
    }
}
