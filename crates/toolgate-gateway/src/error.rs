//! Gateway error types and HTTP error responses

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Result type for gateway lifecycle operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors raised while starting, serving or stopping the gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// IO error on the listener
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Status page template failed to compile
    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    /// `serve` called while a listener is already running
    #[error("Gateway is already serving")]
    AlreadyServing,

    /// In-flight connections outlived the shutdown deadline and were aborted
    #[error("Graceful shutdown did not finish within {0:?}")]
    DrainTimeout(Duration),
}

/// HTTP error returned by the gateway itself (not by an adapter)
#[derive(Debug)]
pub enum ApiError {
    /// 404 Not Found
    NotFound(String),
    /// 405 Method Not Allowed
    MethodNotAllowed(String),
    /// 500 Internal Server Error
    Internal(String),
}

/// Standard error response format
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::MethodNotAllowed(msg) => {
                (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        if status.is_server_error() {
            tracing::error!(error = error_type, %message, "Gateway error");
        } else {
            tracing::debug!(error = error_type, %message, "Gateway client error");
        }

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}
