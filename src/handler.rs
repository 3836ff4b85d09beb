//! Per-session protocol handler seam.
//!
//! The multiplexer knows nothing about what a session actually does. The
//! application supplies a [`HandlerFactory`] that builds one
//! [`SessionHandler`] per session; the handler is owned by its
//! [`SessionRecord`](crate::session::SessionRecord) and only ever reached
//! through a table lookup.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::session::{SessionId, SessionLink};

/// Errors raised by application handlers.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Handler instance could not be built.
    #[error("construction failed: {0}")]
    Construction(String),

    /// Request could not be processed.
    #[error("{0}")]
    Failed(String),

    /// Teardown did not complete cleanly.
    #[error("release failed: {0}")]
    Release(String),
}

/// One isolated protocol handler, exclusively owned by a session.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Process one inbound message.
    ///
    /// Runs inside the session's context scope, so
    /// [`context::current`](crate::session::context::current) returns
    /// `session` anywhere below this call. `Ok(None)` means the message
    /// needs no response (a notification).
    async fn process(
        &self,
        message: Value,
        session: SessionId,
    ) -> Result<Option<Value>, HandlerError>;

    /// Release resources held by this handler.
    ///
    /// Called exactly once, after in-flight requests have drained. Errors are
    /// logged by the caller and otherwise ignored.
    async fn release(&self) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Builds a fresh handler for each new session.
pub trait HandlerFactory: Send + Sync {
    fn construct(&self, link: SessionLink) -> Result<Box<dyn SessionHandler>, HandlerError>;
}

impl<F> HandlerFactory for F
where
    F: Fn(SessionLink) -> Result<Box<dyn SessionHandler>, HandlerError> + Send + Sync,
{
    fn construct(&self, link: SessionLink) -> Result<Box<dyn SessionHandler>, HandlerError> {
        self(link)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Handlers shared by unit tests across the crate.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::protocol;
    use crate::session::context;

    /// Observations recorded by [`RecordingHandler`] instances.
    #[derive(Debug, Default)]
    pub struct Probe {
        pub processed: AtomicUsize,
        pub released: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub fail_release: AtomicBool,
    }

    /// Echoes the request back with the ambient session id.
    ///
    /// Methods:
    /// - `initialize` returns `{"ok": true}`
    /// - `sleep` sleeps for `params.ms` milliseconds
    /// - `fail` returns a handler error
    /// - `close` signals unsolicited close
    /// - anything without an `id` is treated as a notification
    pub struct RecordingHandler {
        pub link: SessionLink,
        pub probe: Arc<Probe>,
    }

    #[async_trait]
    impl SessionHandler for RecordingHandler {
        async fn process(
            &self,
            message: Value,
            session: SessionId,
        ) -> Result<Option<Value>, HandlerError> {
            self.probe.processed.fetch_add(1, Ordering::SeqCst);
            self.probe.in_flight.fetch_add(1, Ordering::SeqCst);

            let method = message["method"].as_str().unwrap_or_default().to_string();
            if method == "sleep" {
                let ms = message["params"]["ms"].as_u64().unwrap_or(50);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }

            let ambient = context::current().map_err(|e| HandlerError::Failed(e.to_string()));
            self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
            let ambient = ambient?;

            match method.as_str() {
                "fail" => return Err(HandlerError::Failed("requested failure".into())),
                "close" => {
                    self.link.close();
                }
                _ => {}
            }

            if message.get("id").is_none() {
                return Ok(None);
            }

            Ok(Some(json!({
                "jsonrpc": protocol::JSONRPC_VERSION,
                "id": message["id"].clone(),
                "result": {
                    "ok": true,
                    "method": method,
                    "session": session.to_string(),
                    "ambient": ambient.to_string(),
                }
            })))
        }

        async fn release(&self) -> Result<(), HandlerError> {
            self.probe.released.fetch_add(1, Ordering::SeqCst);
            if self.probe.fail_release.load(Ordering::SeqCst) {
                return Err(HandlerError::Release("socket already gone".into()));
            }
            Ok(())
        }
    }

    /// Factory producing [`RecordingHandler`]s that share one probe.
    pub fn recording_factory(probe: Arc<Probe>) -> Arc<dyn HandlerFactory> {
        Arc::new(move |link: SessionLink| -> Result<Box<dyn SessionHandler>, HandlerError> {
            Ok(Box::new(RecordingHandler {
                link,
                probe: Arc::clone(&probe),
            }))
        })
    }

    /// Factory that always fails.
    pub fn failing_factory() -> Arc<dyn HandlerFactory> {
        Arc::new(|_link: SessionLink| -> Result<Box<dyn SessionHandler>, HandlerError> {
            Err(HandlerError::Construction("backend unavailable".into()))
        })
    }

    pub fn initialize(id: u64) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "method": "initialize", "params": {}})
    }

    pub fn call(id: u64, method: &str) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "method": method, "params": {}})
    }
}
