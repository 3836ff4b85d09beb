//! Live session records.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::stream::{self, Stream};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch, OwnedRwLockReadGuard, RwLock};
use tracing::{debug, warn};

use super::{context, SessionId, SessionState};
use crate::error::MuxError;
use crate::handler::SessionHandler;
use crate::Result;

/// Sender side of the process-wide close notification channel.
///
/// A handler uses this to ask for its own session to be torn down, e.g.
/// when an upstream connection drops.
#[derive(Debug, Clone)]
pub struct CloseNotifier {
    id: SessionId,
    tx: mpsc::UnboundedSender<SessionId>,
}

impl CloseNotifier {
    pub fn new(id: SessionId, tx: mpsc::UnboundedSender<SessionId>) -> Self {
        Self { id, tx }
    }

    /// Signal that the session should close.
    ///
    /// Returns `false` if the lifecycle controller is gone.
    pub fn notify_closed(&self) -> bool {
        self.tx.send(self.id).is_ok()
    }
}

/// What a handler gets to talk back to its session.
#[derive(Debug, Clone)]
pub struct SessionLink {
    id: SessionId,
    notifications: broadcast::Sender<Value>,
    closer: CloseNotifier,
}

impl SessionLink {
    pub fn new(
        id: SessionId,
        notifications: broadcast::Sender<Value>,
        closer: CloseNotifier,
    ) -> Self {
        Self {
            id,
            notifications,
            closer,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Push an out-of-band message to the session's open streams.
    ///
    /// Returns the number of streams that received it.
    pub fn notify(&self, message: Value) -> usize {
        self.notifications.send(message).unwrap_or(0)
    }

    /// Request unsolicited termination of this session.
    pub fn close(&self) -> bool {
        self.closer.notify_closed()
    }
}

/// One live session: its handler, state, and notification fan-out.
///
/// Records are shared as `Arc<SessionRecord>`. Requests enter through a
/// [`SessionLease`] taken at lookup time; teardown takes the in-flight gate
/// exclusively, so it waits for every admitted request before releasing the
/// handler.
pub struct SessionRecord {
    id: SessionId,
    handler: Box<dyn SessionHandler>,
    state: watch::Sender<SessionState>,
    notifications: broadcast::Sender<Value>,
    gate: Arc<RwLock<()>>,
    created_at: Instant,
    last_activity: Mutex<Instant>,
}

impl SessionRecord {
    /// Create a record in the `Initializing` state.
    pub fn new(
        id: SessionId,
        handler: Box<dyn SessionHandler>,
        notifications: broadcast::Sender<Value>,
    ) -> Self {
        let now = Instant::now();
        let (state, _) = watch::channel(SessionState::Initializing);

        Self {
            id,
            handler,
            state,
            notifications,
            gate: Arc::new(RwLock::new(())),
            created_at: now,
            last_activity: Mutex::new(now),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Atomically move to `target` if the state machine allows it.
    pub fn transition(&self, target: SessionState) -> Result<()> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| match state.transition_to(target) {
            Ok(()) => true,
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Record activity on this session.
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    /// Time since the last request started or finished.
    pub fn idle_duration(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    /// Whether any request is currently being processed.
    pub fn is_busy(&self) -> bool {
        self.gate.try_write().is_err()
    }

    /// Admit one request into this session.
    ///
    /// Returns `None` if the session is closing or teardown already holds
    /// the gate. While the lease lives, the handler is not released.
    pub fn try_lease(self: &Arc<Self>) -> Option<SessionLease> {
        let in_flight = Arc::clone(&self.gate).try_read_owned().ok()?;

        if !self.state().can_process() {
            debug!(session_id = %self.id, state = ?self.state(), "Refusing lease for closing session");
            return None;
        }

        Some(SessionLease {
            record: Arc::clone(self),
            _in_flight: in_flight,
        })
    }

    async fn dispatch(&self, message: Value) -> Result<Option<Value>> {
        self.touch();
        let result = context::scope(self.id, self.handler.process(message, self.id)).await;
        self.touch();

        result.map_err(|e| MuxError::Processing(e.to_string()))
    }

    /// Wait for in-flight requests, then release the handler.
    ///
    /// Release failures are logged and swallowed.
    pub async fn release(&self) {
        let _drained = self.gate.write().await;

        match context::scope(self.id, self.handler.release()).await {
            Ok(()) => debug!(session_id = %self.id, "Handler released"),
            Err(e) => warn!(session_id = %self.id, error = %e, "Handler release failed"),
        }
    }

    /// Subscribe to this session's out-of-band notifications.
    pub fn subscribe(&self) -> Result<NotificationStream> {
        let state = self.state.subscribe();
        if state.borrow().is_closing() {
            return Err(MuxError::UnknownSession(self.id.to_string()));
        }

        Ok(NotificationStream {
            id: self.id,
            notifications: self.notifications.subscribe(),
            state,
        })
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("idle", &self.idle_duration())
            .finish_non_exhaustive()
    }
}

/// A request admitted into a session.
///
/// Holds the session's in-flight gate, so teardown waits for the lease to be
/// dropped before releasing the handler. The handler stays usable for the
/// whole lease even if the session starts closing meanwhile.
pub struct SessionLease {
    record: Arc<SessionRecord>,
    _in_flight: OwnedRwLockReadGuard<()>,
}

impl SessionLease {
    pub fn id(&self) -> SessionId {
        self.record.id
    }

    pub fn record(&self) -> &Arc<SessionRecord> {
        &self.record
    }

    /// Process one message with the session's handler, inside the
    /// session's context scope.
    pub async fn process(&self, message: Value) -> Result<Option<Value>> {
        self.record.dispatch(message).await
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("id", &self.record.id)
            .finish_non_exhaustive()
    }
}

/// Live subscription to a session's notifications.
///
/// Ends when the session starts closing.
#[derive(Debug)]
pub struct NotificationStream {
    id: SessionId,
    notifications: broadcast::Receiver<Value>,
    state: watch::Receiver<SessionState>,
}

impl NotificationStream {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Next notification, or `None` once the session is closing.
    pub async fn next(&mut self) -> Option<Value> {
        loop {
            if self.state.borrow().is_closing() {
                return None;
            }

            tokio::select! {
                received = self.notifications.recv() => match received {
                    Ok(message) => return Some(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(session_id = %self.id, skipped, "Notification stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                changed = self.state.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Adapt into a `Stream` of notifications.
    pub fn into_stream(self) -> impl Stream<Item = Value> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            subscription
                .next()
                .await
                .map(|message| (message, subscription))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::testing::{call, initialize, recording_factory, Probe};
    use crate::handler::HandlerFactory;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn record(probe: &Arc<Probe>) -> (Arc<SessionRecord>, mpsc::UnboundedReceiver<SessionId>) {
        let id = SessionId::new();
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(16);
        let link = SessionLink::new(id, notifications.clone(), CloseNotifier::new(id, close_tx));
        let handler = recording_factory(Arc::clone(probe)).construct(link).unwrap();
        (
            Arc::new(SessionRecord::new(id, handler, notifications)),
            close_rx,
        )
    }

    #[tokio::test]
    async fn test_new_record_is_initializing() {
        let probe = Arc::new(Probe::default());
        let (record, _rx) = record(&probe);
        assert_eq!(record.state(), SessionState::Initializing);
        assert!(!record.is_busy());
    }

    #[tokio::test]
    async fn test_process_runs_in_session_scope() {
        let probe = Arc::new(Probe::default());
        let (record, _rx) = record(&probe);

        let lease = record.try_lease().unwrap();
        let response = lease.process(initialize(1)).await.unwrap().unwrap();
        assert_eq!(response["result"]["ambient"], record.id().to_string());
        assert_eq!(response["result"]["session"], record.id().to_string());
        assert_eq!(probe.processed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lease_refused_after_closing() {
        let probe = Arc::new(Probe::default());
        let (record, _rx) = record(&probe);
        record.transition(SessionState::Closing).unwrap();

        assert!(record.try_lease().is_none());
        assert!(!record.is_busy());
    }

    #[tokio::test]
    async fn test_lease_outlives_closing() {
        let probe = Arc::new(Probe::default());
        let (record, _rx) = record(&probe);
        record.transition(SessionState::Active).unwrap();

        let lease = record.try_lease().unwrap();
        assert!(record.is_busy());
        record.transition(SessionState::Closing).unwrap();

        // Admitted before closing: still served.
        assert!(lease.process(call(2, "ping")).await.unwrap().is_some());
        assert_eq!(probe.processed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lease_refused_while_release_pending() {
        let probe = Arc::new(Probe::default());
        let (record, _rx) = record(&probe);

        let lease = record.try_lease().unwrap();
        record.transition(SessionState::Closing).unwrap();
        let releasing = {
            let record = Arc::clone(&record);
            tokio::spawn(async move { record.release().await })
        };
        tokio::task::yield_now().await;

        assert!(record.try_lease().is_none());
        assert_eq!(probe.released.load(Ordering::SeqCst), 0);

        drop(lease);
        releasing.await.unwrap();
        assert_eq!(probe.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_processing_error() {
        let probe = Arc::new(Probe::default());
        let (record, _rx) = record(&probe);

        let lease = record.try_lease().unwrap();
        let err = lease.process(call(3, "fail")).await.unwrap_err();
        assert!(matches!(err, MuxError::Processing(_)));
        assert!(record.state().can_process());
    }

    #[tokio::test]
    async fn test_transition_rejects_invalid() {
        let probe = Arc::new(Probe::default());
        let (record, _rx) = record(&probe);

        assert!(record.transition(SessionState::Closed).is_err());
        record.transition(SessionState::Active).unwrap();
        record.transition(SessionState::Closing).unwrap();
        assert!(record.transition(SessionState::Closing).is_err());
    }

    #[tokio::test]
    async fn test_release_waits_for_in_flight() {
        let probe = Arc::new(Probe::default());
        let (record, _rx) = record(&probe);

        let busy = Arc::clone(&record);
        let request = tokio::spawn(async move {
            let lease = busy.try_lease().unwrap();
            lease
                .process(json!({"jsonrpc": "2.0", "id": 1, "method": "sleep", "params": {"ms": 100}}))
                .await
        });

        // Let the request take the gate.
        while probe.in_flight.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(record.is_busy());

        record.transition(SessionState::Closing).unwrap();
        record.release().await;

        assert_eq!(probe.released.load(Ordering::SeqCst), 1);
        assert_eq!(probe.in_flight.load(Ordering::SeqCst), 0);
        assert!(request.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_release_failure_is_swallowed() {
        let probe = Arc::new(Probe::default());
        probe.fail_release.store(true, Ordering::SeqCst);
        let (record, _rx) = record(&probe);

        record.release().await;
        assert_eq!(probe.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_signal_carries_session_id() {
        let probe = Arc::new(Probe::default());
        let (record, mut rx) = record(&probe);

        record.try_lease().unwrap().process(call(4, "close")).await.unwrap();
        assert_eq!(rx.recv().await, Some(record.id()));
    }

    #[tokio::test]
    async fn test_notification_stream_ends_on_close() {
        let probe = Arc::new(Probe::default());
        let (record, _rx) = record(&probe);
        record.transition(SessionState::Active).unwrap();

        let mut stream = Box::pin(record.subscribe().unwrap().into_stream());
        record.notifications.send(json!({"method": "notifications/message"})).unwrap();
        assert_eq!(
            stream.next().await,
            Some(json!({"method": "notifications/message"}))
        );

        record.transition(SessionState::Closing).unwrap();
        assert_eq!(stream.next().await, None);
        assert!(record.subscribe().is_err());
    }

    #[tokio::test]
    async fn test_touch_resets_idle() {
        let probe = Arc::new(Probe::default());
        let (record, _rx) = record(&probe);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(record.idle_duration() >= Duration::from_millis(20));
        record.touch();
        assert!(record.idle_duration() < Duration::from_millis(20));
    }
}
