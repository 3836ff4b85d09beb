//! Session lifecycle controller.
//!
//! [`SessionManager`] owns the session table and is the only place where
//! records are created or destroyed:
//!
//! ```text
//! establish:  mint id -> construct handler -> insert (Initializing)
//!             -> process handshake in scope -> Active
//! continue:   lookup -> process in scope (state unchanged)
//! terminate:  Active -> Closing -> remove from table -> drain in-flight
//!             -> release handler -> Closed
//! ```
//!
//! Termination removes the id from the table before waiting for in-flight
//! requests, so new requests see "unknown session" immediately while
//! requests already holding the record run to completion.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::MuxError;
use crate::handler::HandlerFactory;
use crate::routing::{self, Route};
use crate::session::{
    CloseNotifier, NotificationStream, SessionId, SessionLease, SessionLink, SessionRecord,
    SessionState, SessionTable,
};
use crate::Result;

/// Default capacity of each session's notification channel.
pub const DEFAULT_NOTIFICATION_BUFFER: usize = 64;

/// Outcome of a successfully routed message.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Session the message was processed in.
    pub session_id: SessionId,
    /// Whether this message created the session.
    pub established: bool,
    /// Handler response; `None` for notifications.
    pub response: Option<Value>,
}

/// Creates, routes to, and tears down sessions.
pub struct SessionManager {
    table: SessionTable,
    factory: Arc<dyn HandlerFactory>,
    close_tx: mpsc::UnboundedSender<SessionId>,
    notification_buffer: usize,
}

impl SessionManager {
    /// Create a manager and start its close-notification listener.
    ///
    /// The listener needs a Tokio runtime; without one, handler-initiated
    /// close signals are dropped (explicit termination still works).
    pub fn start(factory: Arc<dyn HandlerFactory>) -> Arc<Self> {
        Self::start_with_buffer(factory, DEFAULT_NOTIFICATION_BUFFER)
    }

    /// Like [`start`](Self::start) with a custom notification buffer size.
    pub fn start_with_buffer(factory: Arc<dyn HandlerFactory>, buffer: usize) -> Arc<Self> {
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            table: SessionTable::new(),
            factory,
            close_tx,
            notification_buffer: buffer.max(1),
        });

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(close_listener(Arc::downgrade(&manager), close_rx));
            }
            Err(_) => warn!("No Tokio runtime; handler close notifications are disabled"),
        }

        manager
    }

    /// The session table.
    pub fn table(&self) -> &SessionTable {
        &self.table
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.table.count()
    }

    /// Route one message according to its session header and body.
    pub async fn handle_message(&self, header: Option<&str>, body: Value) -> Result<Dispatch> {
        match routing::classify(&self.table, header, &body)? {
            Route::Establish => self.establish(body).await,
            Route::Continue(lease) => self.continue_session(lease, body).await,
            Route::Reject(rejection) => {
                debug!(?rejection, "Rejected request");
                Err(rejection.into())
            }
        }
    }

    /// Open a new session with `body` as its handshake.
    pub async fn establish(&self, body: Value) -> Result<Dispatch> {
        let id = SessionId::new();
        let (notifications, _) = broadcast::channel(self.notification_buffer);
        let link = SessionLink::new(
            id,
            notifications.clone(),
            CloseNotifier::new(id, self.close_tx.clone()),
        );

        let handler = self.factory.construct(link).map_err(|e| {
            warn!(error = %e, "Handler construction failed");
            MuxError::Construction(e.to_string())
        })?;

        let record = Arc::new(SessionRecord::new(id, handler, notifications));
        // Leased before it becomes visible, so nothing can tear it down
        // before the handshake has run.
        let lease = record
            .try_lease()
            .ok_or_else(|| MuxError::UnknownSession(id.to_string()))?;
        self.table.insert(Arc::clone(&record))?;
        debug!(session_id = %id, "Session initializing");

        let outcome = lease.process(body).await;
        drop(lease);

        match outcome {
            Ok(response) => {
                if let Err(e) = record.transition(SessionState::Active) {
                    // Closed by its own handler during the handshake.
                    debug!(session_id = %id, error = %e, "Session closed before activation");
                } else {
                    info!(session_id = %id, "Session established");
                }

                Ok(Dispatch {
                    session_id: id,
                    established: true,
                    response,
                })
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Handshake failed; discarding session");
                self.terminate_record(&record).await;
                Err(e)
            }
        }
    }

    /// Deliver `body` to the session admitted by `lease`.
    ///
    /// The lease is held until the handler returns, so a concurrent
    /// termination waits for this request.
    pub async fn continue_session(&self, lease: SessionLease, body: Value) -> Result<Dispatch> {
        let response = lease.process(body).await?;

        Ok(Dispatch {
            session_id: lease.id(),
            established: false,
            response,
        })
    }

    /// Resolve a header to a live record.
    pub fn resolve(&self, header: Option<&str>) -> Result<Arc<SessionRecord>> {
        routing::resolve_session(&self.table, header)
    }

    /// Subscribe to the notifications of the session named by `header`.
    pub fn open_stream(&self, header: Option<&str>) -> Result<NotificationStream> {
        self.resolve(header)?.subscribe()
    }

    /// Terminate the session with the given id.
    ///
    /// Returns `false` if there was nothing to terminate.
    pub async fn terminate(&self, id: &SessionId) -> Result<bool> {
        match self.table.lookup(id)? {
            Some(record) => Ok(self.terminate_record(&record).await),
            None => Ok(false),
        }
    }

    /// Tear down `record`.
    ///
    /// Idempotent: returns `false` if the record was already closing or
    /// closed. Never fails; teardown problems are logged.
    pub async fn terminate_record(&self, record: &Arc<SessionRecord>) -> bool {
        let id = record.id();

        if let Err(e) = record.transition(SessionState::Closing) {
            debug!(session_id = %id, error = %e, "Termination already in progress");
            return false;
        }

        if let Err(e) = self.table.remove(&id) {
            warn!(session_id = %id, error = %e, "Failed to remove session from table");
        }

        record.release().await;

        if let Err(e) = record.transition(SessionState::Closed) {
            warn!(session_id = %id, error = %e, "Unexpected state after release");
        }

        info!(session_id = %id, "Session closed");
        true
    }

    /// Terminate sessions idle for at least `max_idle`.
    ///
    /// Sessions with a request in flight are skipped.
    pub async fn reap_idle(&self, max_idle: Duration) -> Result<usize> {
        let idle: Vec<_> = self
            .table
            .records()?
            .into_iter()
            .filter(|record| record.idle_duration() >= max_idle && !record.is_busy())
            .collect();

        let mut reaped = 0;
        for record in idle {
            debug!(session_id = %record.id(), idle = ?record.idle_duration(), "Reaping idle session");
            if self.terminate_record(&record).await {
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    /// Periodically reap idle sessions until the manager is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, max_idle: Duration, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                match manager.reap_idle(max_idle).await {
                    Ok(0) => {}
                    Ok(reaped) => info!(reaped, "Reaped idle sessions"),
                    Err(e) => warn!(error = %e, "Idle reaping failed"),
                }
            }
        })
    }

    /// Terminate every live session. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        let records = match self.table.records() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Cannot enumerate sessions for shutdown");
                return 0;
            }
        };

        join_all(records.iter().map(|record| self.terminate_record(record)))
            .await
            .into_iter()
            .filter(|closed| *closed)
            .count()
    }
}

/// Terminate sessions whose handlers asked to be closed.
async fn close_listener(manager: Weak<SessionManager>, mut rx: mpsc::UnboundedReceiver<SessionId>) {
    while let Some(id) = rx.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };

        debug!(session_id = %id, "Handler requested close");
        // Teardown waits for in-flight requests, possibly the one that sent
        // this signal, so it must not block the listener.
        tokio::spawn(async move {
            if let Err(e) = manager.terminate(&id).await {
                warn!(session_id = %id, error = %e, "Close notification failed");
            }
        });
    }
}
