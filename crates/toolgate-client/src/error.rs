//! Error types for backend client operations

use thiserror::Error;
use toolgate_core::ServiceError;

/// Result type alias for backend client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while talking to a backend
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Server returned an unexpected status
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Backend rejected the credentials
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Login response could not be classified as success or rejection
    #[error("Login failed: {0}")]
    LoginFailed(String),

    /// Login page markup carried no anti-forgery token
    #[error("CSRF token not found in login page")]
    CsrfTokenMissing,

    /// Query API answered with an error envelope
    #[error("Query failed ({error_type}): {message}")]
    QueryFailed { error_type: String, message: String },

    /// Timeout
    #[error("Request timed out")]
    Timeout,
}

impl ClientError {
    /// Create a server error from status code and message
    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    /// Whether this failure came from login or token handling
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ClientError::AuthenticationFailed(_)
                | ClientError::LoginFailed(_)
                | ClientError::CsrfTokenMissing
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::HttpError(err)
        }
    }
}

impl From<ClientError> for ServiceError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Timeout => ServiceError::Timeout,
            e if e.is_auth() => ServiceError::Authentication(e.to_string()),
            e => ServiceError::Backend(e.to_string()),
        }
    }
}
