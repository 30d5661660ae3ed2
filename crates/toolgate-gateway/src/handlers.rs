//! HTTP handlers: status page and per-request adapter dispatch

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use toolgate_core::{ToolCall, ToolInfo, ToolResult};
use tracing::{debug, error};

use crate::error::ApiError;
use crate::routing::RoutingTable;
use crate::status::StatusPage;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub routes: RoutingTable,
    pub status: Arc<StatusPage>,
    pub addresses: Arc<Vec<String>>,
    pub port: u16,
}

/// Tool listing returned by `GET <endpoint>`
#[derive(Debug, Serialize)]
pub struct ToolListing {
    pub service: String,
    pub endpoint: String,
    pub tools: Vec<ToolInfo>,
}

/// GET /
pub async fn status_page(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    state
        .status
        .render(&state.routes, &state.addresses, state.port)
        .map(Html)
        .map_err(|e| {
            error!(error = ?e, "Failed to render status page");
            ApiError::Internal("Internal server error".to_string())
        })
}

/// Fallback handler: looks the adapter up on every request, so services added
/// or removed after the listener started take effect immediately.
pub async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    let path = uri.path();
    let service = state
        .routes
        .resolve(path)
        .ok_or_else(|| ApiError::NotFound(format!("No service mounted at {}", path)))?;

    match method {
        Method::GET => Ok(Json(ToolListing {
            service: service.kind().to_string(),
            endpoint: service.endpoint().to_string(),
            tools: service.tools(),
        })
        .into_response()),
        Method::POST => {
            let call: ToolCall = match serde_json::from_slice(&body) {
                Ok(call) => call,
                Err(e) => {
                    debug!(%path, error = %e, "Rejected malformed tool call");
                    let result = ToolResult::error(format!("Invalid tool call: {}", e));
                    return Ok((StatusCode::BAD_REQUEST, Json(result)).into_response());
                }
            };

            debug!(%path, tool = %call.tool, "Dispatching tool call");
            Ok(Json(service.handle(call).await).into_response())
        }
        other => Err(ApiError::MethodNotAllowed(format!(
            "{} is not supported on {}",
            other, path
        ))),
    }
}
