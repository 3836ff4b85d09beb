//! Session management module.
//!
//! This module provides the building blocks of the multiplexer: session
//! identification, the lifecycle state machine, the ambient context carrier,
//! live records and the table that owns them.

pub mod context;
mod id;
mod record;
mod state;
mod table;

pub use id::SessionId;
pub use record::{CloseNotifier, NotificationStream, SessionLease, SessionLink, SessionRecord};
pub use state::SessionState;
pub use table::SessionTable;
