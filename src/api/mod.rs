//! HTTP transport for session-mux.
//!
//! A single endpoint carries every session. The `mcp-session-id` header
//! selects the session; its absence together with an `initialize` request
//! establishes a new one.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `POST {endpoint}` - Establish a session or send it a message
//! - `GET {endpoint}` - Server-sent notification stream of a session
//! - `DELETE {endpoint}` - Terminate a session
//!
//! The endpoint defaults to `/mcp`.
//!
//! ## Example
//!
//! ```no_run
//! use session_mux::api::{serve, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> session_mux::Result<()> {
//!     let config = ServerConfig::new("127.0.0.1", 5004);
//!     serve(config).await
//! }
//! ```

pub mod handlers;
pub mod router;
pub mod stream;
pub mod types;

pub use handlers::AppState;
pub use router::{
    create_router, create_router_at, create_router_with_state, serve, serve_with_state,
    ServerConfig, DEFAULT_ENDPOINT,
};
pub use types::{ApiError, HealthResponse};
