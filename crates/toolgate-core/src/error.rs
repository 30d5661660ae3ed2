//! Common error types for backend adapters

use thiserror::Error;

use crate::service::ServiceKind;

/// Result type for adapter operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Boxed underlying cause carried by construction and connection errors
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while building or calling a backend adapter
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing or invalid configuration field
    #[error("Invalid configuration for {field}: {message}")]
    Config { field: String, message: String },

    /// No factory registered for the requested kind
    #[error("Unsupported service kind: {0}")]
    UnsupportedKind(ServiceKind),

    /// A factory failed to build its adapter
    #[error("Failed to create {kind} service: {source}")]
    Creation {
        kind: ServiceKind,
        #[source]
        source: BoxError,
    },

    /// Backend could not be reached
    #[error("Failed to connect to {kind} at {endpoint}: {message}")]
    Connection {
        kind: ServiceKind,
        endpoint: String,
        message: String,
    },

    /// Login or anti-forgery token failure
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Transport, non-success status or decode failure from the backend
    #[error("Backend call failed: {0}")]
    Backend(String),

    /// Tool arguments could not be decoded or were out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Timeout waiting for the backend or for a lock
    #[error("Operation timed out")]
    Timeout,
}

impl ServiceError {
    /// Create a configuration error for a named field
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Wrap a factory failure for `kind`
    pub fn creation(kind: ServiceKind, source: impl Into<BoxError>) -> Self {
        Self::Creation {
            kind,
            source: source.into(),
        }
    }
}
