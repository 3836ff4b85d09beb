//! API response and error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::{ErrorCategory, MuxError};
use crate::protocol::RpcResponse;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok",
            service: "session-mux",
        }
    }
}

/// Error returned by endpoint handlers, rendered as a JSON-RPC error body.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: RpcResponse,
}

impl ApiError {
    /// Build from a crate error, answering request `id`.
    ///
    /// Routing errors answer with `id: null` since no session processed the
    /// request.
    pub fn from_error(err: &MuxError, id: Value) -> Self {
        let (status, id) = match err.category() {
            ErrorCategory::Routing => (StatusCode::BAD_REQUEST, Value::Null),
            ErrorCategory::Construction => (StatusCode::INTERNAL_SERVER_ERROR, Value::Null),
            // Application-level failure: the session stays up and the caller
            // gets a regular JSON-RPC error.
            ErrorCategory::Processing => (StatusCode::OK, id),
            ErrorCategory::Internal => (StatusCode::INTERNAL_SERVER_ERROR, Value::Null),
        };

        Self {
            status,
            body: RpcResponse::failure(id, err.to_rpc_error()),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl From<MuxError> for ApiError {
    fn from(err: MuxError) -> Self {
        Self::from_error(&err, Value::Null)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
