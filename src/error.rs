//! Error types for session-mux.

use thiserror::Error;

use crate::protocol::RpcError;
use crate::session::SessionState;

/// Main error type for session-mux operations.
#[derive(Error, Debug)]
pub enum MuxError {
    /// Request carried no session header and was not an establishment request.
    #[error("Bad Request: No valid session ID provided")]
    MissingSession,

    /// Session header did not match any live session.
    #[error("Bad Request: unknown or expired session: {0}")]
    UnknownSession(String),

    /// Establishment request sent for a session that already exists.
    #[error("Invalid Request: session already initialized")]
    AlreadyInitialized,

    /// Request body was not valid JSON.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Session with the given ID already exists in the table.
    #[error("session already exists: {0}")]
    SessionExists(String),

    /// Handler instance could not be constructed.
    #[error("failed to construct session handler: {0}")]
    Construction(String),

    /// Handler failed while processing a request.
    #[error("request processing failed: {0}")]
    Processing(String),

    /// Queried the session context outside of any scope.
    #[error("no active session context")]
    NoActiveSession,

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition { from: SessionState, to: SessionState },

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification used when surfacing errors to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing/unknown session or malformed establishment.
    Routing,
    /// Handler construction failed.
    Construction,
    /// Handler failed while processing a request.
    Processing,
    /// Anything else the server could not handle.
    Internal,
}

impl MuxError {
    /// Classify this error for the transport layer.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingSession
            | Self::UnknownSession(_)
            | Self::AlreadyInitialized
            | Self::Parse(_) => ErrorCategory::Routing,
            Self::Construction(_) => ErrorCategory::Construction,
            Self::Processing(_) => ErrorCategory::Processing,
            _ => ErrorCategory::Internal,
        }
    }

    /// JSON-RPC error object describing this error to a caller.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Parse(_) => RpcError::parse_error(self.to_string()),
            Self::AlreadyInitialized => RpcError::invalid_request(self.to_string()),
            Self::MissingSession | Self::UnknownSession(_) => RpcError::bad_request(self.to_string()),
            _ => RpcError::internal(self.to_string()),
        }
    }
}

/// Convenience Result type for session-mux operations.
pub type Result<T> = std::result::Result<T, MuxError>;
