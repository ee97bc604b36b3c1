//! Error types and result handling for the integration gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for integration gateway operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Circuit breaker is open for {0}")]
    CircuitOpen(String),

    #[error("Remote rejected request with status {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Session error: {0}")]
    Session(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Max resubmission attempts exceeded: {0}")]
    MaxAttemptsExceeded(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if the error is transient and eligible for retry
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::Timeout(_) => true,
            Error::Remote { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Get error category for metrics and structured logs
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Validation(_) => "validation",
            Error::NotAuthenticated(_) => "not_authenticated",
            Error::Authentication(_) => "authentication",
            Error::Network(_) => "network",
            Error::Timeout(_) => "timeout",
            Error::CircuitOpen(_) => "circuit_open",
            Error::Remote { .. } => "remote",
            Error::Session(_) => "session",
            Error::Render(_) => "render",
            Error::Delivery(_) => "delivery",
            Error::MaxAttemptsExceeded(_) => "max_attempts",
            Error::Persistence(_) => "persistence",
            Error::Unsupported(_) => "unsupported",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
        }
    }

    /// Build an error from an HTTP status and response body
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Error::Remote {
            status,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else if err.is_connect() {
            Error::Network(err.to_string())
        } else if let Some(status) = err.status() {
            Error::Remote {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Error::Network(err.to_string())
        }
    }
}
