//! Ambient session context.
//!
//! Code running inside [`scope`] can ask which session it serves with
//! [`current`], at any call depth and across `.await` points, without the
//! identifier being threaded through every function. The value is bound to
//! the logical task (a Tokio task-local), so concurrent scopes never observe
//! each other's identifier even when they share worker threads or migrate
//! between them.
//!
//! Task-locals do not cross `tokio::spawn`. Use [`spawn_scoped`] to carry the
//! current session into a detached task.

use std::future::Future;

use tokio::task::JoinHandle;

use super::SessionId;
use crate::error::MuxError;
use crate::Result;

tokio::task_local! {
    static CURRENT_SESSION: SessionId;
}

/// Run `body` with `id` as the active session.
pub async fn scope<F>(id: SessionId, body: F) -> F::Output
where
    F: Future,
{
    CURRENT_SESSION.scope(id, body).await
}

/// Run a synchronous closure with `id` as the active session.
pub fn sync_scope<F, R>(id: SessionId, f: F) -> R
where
    F: FnOnce() -> R,
{
    CURRENT_SESSION.sync_scope(id, f)
}

/// The active session, or [`MuxError::NoActiveSession`] outside any scope.
pub fn current() -> Result<SessionId> {
    CURRENT_SESSION.try_with(|id| *id).map_err(|_| MuxError::NoActiveSession)
}

/// The active session, if any.
pub fn try_current() -> Option<SessionId> {
    CURRENT_SESSION.try_with(|id| *id).ok()
}

/// Spawn a task that inherits the caller's session scope.
///
/// Outside any scope the task is spawned unscoped.
pub fn spawn_scoped<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match try_current() {
        Some(id) => tokio::spawn(CURRENT_SESSION.scope(id, future)),
        None => tokio::spawn(future),
    }
}
