//! Request classification.
//!
//! Every inbound message is classified from two inputs only: the optional
//! session header and whether the body is an establishment request. The
//! header is checked first, so an establishment body sent with a session id
//! can never re-initialize an existing session.

use std::sync::Arc;

use serde_json::Value;

use crate::error::MuxError;
use crate::protocol;
use crate::session::{SessionId, SessionLease, SessionRecord, SessionTable};
use crate::Result;

/// Name of the header carrying the session identifier.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Why a request was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No header and the body does not open a session.
    MissingSession,
    /// Header names no live session.
    UnknownSession(String),
    /// Establishment body sent for an already established session.
    AlreadyInitialized,
}

impl From<Rejection> for MuxError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::MissingSession => MuxError::MissingSession,
            Rejection::UnknownSession(id) => MuxError::UnknownSession(id),
            Rejection::AlreadyInitialized => MuxError::AlreadyInitialized,
        }
    }
}

/// Routing decision for one request.
#[derive(Debug)]
pub enum Route {
    /// Mint a new session and hand it the body.
    Establish,
    /// Deliver the body to an existing session. The lease keeps the
    /// session's handler alive until the body has been processed.
    Continue(SessionLease),
    /// Turn the request away without touching the table.
    Reject(Rejection),
}

/// Normalize a raw header value; blank counts as absent.
pub fn normalize_header(header: Option<&str>) -> Option<&str> {
    header.map(str::trim).filter(|value| !value.is_empty())
}

/// Find the live, non-closing record named by `header`.
fn find_live(table: &SessionTable, header: &str) -> Result<Option<Arc<SessionRecord>>> {
    let Ok(id) = header.parse::<SessionId>() else {
        return Ok(None);
    };

    Ok(table
        .lookup(&id)?
        .filter(|record| !record.state().is_closing()))
}

/// Classify a message-carrying request.
///
/// | header  | establishment body | record | route |
/// |---------|--------------------|--------|-------|
/// | absent  | yes                | -      | Establish |
/// | absent  | no                 | -      | Reject (missing) |
/// | present | no                 | found  | Continue |
/// | present | yes                | found  | Reject (already initialized) |
/// | present | any                | absent | Reject (unknown) |
///
/// A `Continue` route holds a lease on the session taken at lookup time,
/// so a termination racing with this request waits for it to finish.
pub fn classify(table: &SessionTable, header: Option<&str>, body: &Value) -> Result<Route> {
    let establishing = protocol::is_establishment_request(body);

    let Some(header) = normalize_header(header) else {
        return Ok(if establishing {
            Route::Establish
        } else {
            Route::Reject(Rejection::MissingSession)
        });
    };

    let unknown = || Route::Reject(Rejection::UnknownSession(header.to_string()));

    Ok(match find_live(table, header)? {
        Some(_) if establishing => Route::Reject(Rejection::AlreadyInitialized),
        Some(record) => record.try_lease().map_or_else(unknown, Route::Continue),
        None => unknown(),
    })
}

/// Resolve a header to a live session for body-less requests (stream, delete).
///
/// No lease is taken: these requests never run the handler.
pub fn resolve_session(table: &SessionTable, header: Option<&str>) -> Result<Arc<SessionRecord>> {
    let Some(header) = normalize_header(header) else {
        return Err(Rejection::MissingSession.into());
    };

    find_live(table, header)?
        .ok_or_else(|| Rejection::UnknownSession(header.to_string()).into())
}
