//! # session-mux
//!
//! Session-scoped multiplexer for stateful JSON-RPC sessions over HTTP.
//!
//! One endpoint serves many independent logical sessions. Each session gets
//! its own handler instance, created when a client sends an `initialize`
//! request without a session header and addressed afterwards through the
//! `mcp-session-id` header. While a request is processed, the id of the
//! session it belongs to is available through [`session::context::current`].
//!
//! ## Features
//!
//! - **Per-session isolation**: one handler instance per session, never shared
//! - **Ambient session context**: task-local, safe under concurrent requests
//! - **Orderly teardown**: in-flight requests finish before a handler is released
//! - **Transports**: HTTP (POST/GET/DELETE on one endpoint) or stdio
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use session_mux::{api, app::DemoFactory, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> session_mux::Result<()> {
//!     session_mux::logging::try_init().ok();
//!
//!     let manager = SessionManager::start(Arc::new(DemoFactory::new()));
//!     let state = api::AppState::with_manager(manager);
//!
//!     api::serve_with_state(api::ServerConfig::default(), state).await
//! }
//! ```

pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod logging;
pub mod protocol;
pub mod routing;
pub mod session;
pub mod stdio;

// Re-export commonly used types
pub use error::{MuxError, Result};
pub use handler::{HandlerError, HandlerFactory, SessionHandler};
pub use lifecycle::{Dispatch, SessionManager};
pub use routing::{Rejection, Route, SESSION_ID_HEADER};
pub use session::{
    NotificationStream, SessionId, SessionLease, SessionLink, SessionRecord, SessionState,
    SessionTable,
};
