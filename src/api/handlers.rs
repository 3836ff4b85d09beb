//! Endpoint handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::{debug, warn};

use super::types::{ApiError, HealthResponse};
use crate::app::DemoFactory;
use crate::error::MuxError;
use crate::handler::HandlerFactory;
use crate::lifecycle::SessionManager;
use crate::protocol;
use crate::routing::SESSION_ID_HEADER;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
}

impl AppState {
    /// State serving the demo application.
    pub fn new() -> Self {
        Self::with_factory(Arc::new(DemoFactory::new()))
    }

    /// State serving handlers built by `factory`.
    pub fn with_factory(factory: Arc<dyn HandlerFactory>) -> Self {
        Self::with_manager(SessionManager::start(factory))
    }

    pub fn with_manager(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// The session header of a request, if present and valid UTF-8.
pub(crate) fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

/// Client-to-server messages: establish a session or continue one.
pub async fn post_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let message: Value = serde_json::from_slice(&body).map_err(|e| {
        debug!(error = %e, "Malformed request body");
        ApiError::from(MuxError::from(e))
    })?;
    let request_id = protocol::request_id(&message);

    let dispatch = state
        .manager
        .handle_message(session_header(&headers), message)
        .await
        .map_err(|e| {
            debug!(error = %e, "POST rejected");
            ApiError::from_error(&e, request_id)
        })?;

    let mut response = match dispatch.response {
        Some(body) => (StatusCode::OK, Json(body)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };

    if dispatch.established {
        match HeaderValue::from_str(&dispatch.session_id.to_string()) {
            Ok(value) => {
                response.headers_mut().insert(SESSION_ID_HEADER, value);
            }
            Err(e) => warn!(error = %e, "Session id is not a valid header value"),
        }
    }

    Ok(response)
}

/// Explicit session termination.
pub async fn delete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let record = state
        .manager
        .resolve(session_header(&headers))
        .map_err(|e| match e {
            MuxError::UnknownSession(_) => ApiError::from(e).with_status(StatusCode::NOT_FOUND),
            other => ApiError::from(other),
        })?;

    state.manager.terminate_record(&record).await;
    Ok(StatusCode::OK)
}
