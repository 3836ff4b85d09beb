//! Demo application served by the `session-mux` binary.
//!
//! Implements a small tool server on top of the multiplexer so the binary is
//! usable end to end. Every session gets its own [`DemoHandler`] with its own
//! call counter.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::handler::{HandlerError, HandlerFactory, SessionHandler};
use crate::protocol::{self, RpcError, RpcRequest, RpcResponse};
use crate::session::{context, SessionId, SessionLink};

/// Protocol revision reported when the client does not ask for one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

const SERVER_NAME: &str = "session-mux-demo";

/// Builds one [`DemoHandler`] per session.
#[derive(Debug, Clone)]
pub struct DemoFactory {
    started_at: SystemTime,
}

impl DemoFactory {
    pub fn new() -> Self {
        Self {
            started_at: SystemTime::now(),
        }
    }
}

impl Default for DemoFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerFactory for DemoFactory {
    fn construct(&self, link: SessionLink) -> Result<Box<dyn SessionHandler>, HandlerError> {
        Ok(Box::new(DemoHandler {
            link,
            started_at: self.started_at,
            calls: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
        }))
    }
}

/// Per-session tool server.
pub struct DemoHandler {
    link: SessionLink,
    started_at: SystemTime,
    calls: AtomicU64,
    initialized: AtomicBool,
}

impl DemoHandler {
    fn initialize(&self, request: &RpcRequest) -> Value {
        let version = request
            .param("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);

        json!({
            "protocolVersion": version,
            "capabilities": {
                "tools": { "listChanged": true },
                "logging": {}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    fn list_tools(&self) -> Value {
        json!({
            "tools": [
                {
                    "name": "generate_mock",
                    "title": "Mock Generator",
                    "description": "Generates a static joke about the given topic",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "topic": { "type": "string" } },
                        "required": ["topic"]
                    }
                },
                {
                    "name": "check_version",
                    "title": "Check Version",
                    "description": "Build and version information of the running server",
                    "inputSchema": { "type": "object", "properties": {} }
                },
                {
                    "name": "session_info",
                    "title": "Session Info",
                    "description": "Identifier and call count of the current session",
                    "inputSchema": { "type": "object", "properties": {} }
                },
                {
                    "name": "end_session",
                    "title": "End Session",
                    "description": "Ask the server to close this session",
                    "inputSchema": { "type": "object", "properties": {} }
                }
            ]
        })
    }

    fn call_tool(&self, request: &RpcRequest) -> Result<std::result::Result<Value, RpcError>, HandlerError> {
        let Some(name) = request.param("name").and_then(Value::as_str) else {
            return Ok(Err(RpcError::invalid_params("missing tool name")));
        };
        let arguments = request.param("arguments").cloned().unwrap_or(Value::Null);

        match name {
            "generate_mock" if !arguments.get("topic").is_some_and(Value::is_string) => {
                return Ok(Err(RpcError::invalid_params("'topic' must be a string")));
            }
            "generate_mock" | "check_version" | "session_info" | "end_session" => {}
            other => {
                return Ok(Err(RpcError::invalid_params(format!("unknown tool: {}", other))));
            }
        }

        // Only calls that actually run a tool are counted.
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let text = match name {
            "generate_mock" => {
                let topic = arguments
                    .get("topic")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let joke = format!(
                    "Why did the {} cross the road? To get to the other side!",
                    topic
                );
                debug!(topic, "generate_mock called");
                pretty(&json!({
                    "joke": joke,
                    "topic": topic,
                    "disclaimer": "This is a mock response for testing session multiplexing"
                }))
            }
            "check_version" => {
                let started_ms = self
                    .started_at
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis())
                    .unwrap_or(0);
                format!(
                    "{} {}\nStarted at (unix ms): {}",
                    SERVER_NAME,
                    env!("CARGO_PKG_VERSION"),
                    started_ms
                )
            }
            "session_info" => {
                let session = context::current().map_err(|e| HandlerError::Failed(e.to_string()))?;
                pretty(&json!({ "session_id": session.to_string(), "calls": calls }))
            }
            // end_session
            _ => {
                self.link.close();
                "Session will be closed".to_string()
            }
        };

        self.link.notify(protocol::notification(
            "notifications/message",
            json!({
                "level": "info",
                "logger": SERVER_NAME,
                "data": format!("tool '{}' called ({} calls in this session)", name, calls)
            }),
        ));

        Ok(Ok(json!({
            "content": [{ "type": "text", "text": text }]
        })))
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[async_trait]
impl SessionHandler for DemoHandler {
    async fn process(
        &self,
        message: Value,
        session: SessionId,
    ) -> Result<Option<Value>, HandlerError> {
        let Some(request) = RpcRequest::from_value(&message) else {
            let error = RpcError::invalid_request("expected a single JSON-RPC 2.0 message");
            return Ok(Some(
                RpcResponse::failure(protocol::request_id(&message), error).into_value(),
            ));
        };

        if request.is_notification() {
            if request.method == "notifications/initialized" {
                self.initialized.store(true, Ordering::SeqCst);
                debug!(session_id = %session, "Client initialized");
            }
            return Ok(None);
        }

        let id = request.id.clone().unwrap_or(Value::Null);
        let outcome = match request.method.as_str() {
            protocol::INITIALIZE_METHOD => Ok(self.initialize(&request)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(&request)?,
            other => Err(RpcError::method_not_found(other)),
        };

        Ok(Some(
            match outcome {
                Ok(result) => RpcResponse::success(id, result),
                Err(error) => RpcResponse::failure(id, error),
            }
            .into_value(),
        ))
    }

    async fn release(&self) -> Result<(), HandlerError> {
        info!(
            session_id = %self.link.id(),
            calls = self.calls.load(Ordering::SeqCst),
            initialized = self.initialized.load(Ordering::SeqCst),
            "Demo session released"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codes;
    use crate::session::CloseNotifier;
    use tokio::sync::{broadcast, mpsc};

    struct Harness {
        handler: Box<dyn SessionHandler>,
        id: SessionId,
        notifications: broadcast::Receiver<Value>,
        closes: mpsc::UnboundedReceiver<SessionId>,
    }

    fn harness() -> Harness {
        let id = SessionId::new();
        let (close_tx, closes) = mpsc::unbounded_channel();
        let (tx, notifications) = broadcast::channel(8);
        let link = SessionLink::new(id, tx, CloseNotifier::new(id, close_tx));
        Harness {
            handler: DemoFactory::new().construct(link).unwrap(),
            id,
            notifications,
            closes,
        }
    }

    async fn send(h: &Harness, message: Value) -> Value {
        context::scope(h.id, h.handler.process(message, h.id))
            .await
            .unwrap()
            .unwrap()
    }

    fn tool_call(id: u64, name: &str, arguments: Value) -> Value {
        json!({
            "jsonrpc": "2.0", "id": id, "method": "tools/call",
            "params": {"name": name, "arguments": arguments}
        })
    }

    fn text(response: &Value) -> String {
        response["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_initialize() {
        let h = harness();
        let response = send(
            &h,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize",
                   "params": {"protocolVersion": "2024-11-05"}}),
        )
        .await;

        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(response["result"]["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(response["result"]["capabilities"]["tools"]["listChanged"], true);
    }

    #[tokio::test]
    async fn test_initialized_notification_has_no_response() {
        let h = harness();
        let response = context::scope(
            h.id,
            h.handler.process(
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
                h.id,
            ),
        )
        .await
        .unwrap();
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_ping_and_list() {
        let h = harness();
        assert_eq!(
            send(&h, json!({"jsonrpc": "2.0", "id": 2, "method": "ping"})).await["result"],
            json!({})
        );

        let tools = send(&h, json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"})).await;
        let names: Vec<&str> = tools["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|tool| tool["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            ["generate_mock", "check_version", "session_info", "end_session"]
        );
    }

    #[tokio::test]
    async fn test_generate_mock() {
        let mut h = harness();
        let response = send(&h, tool_call(4, "generate_mock", json!({"topic": "crab"}))).await;

        assert!(text(&response).contains("Why did the crab cross the road?"));

        let notification = h.notifications.recv().await.unwrap();
        assert_eq!(notification["method"], "notifications/message");
    }

    #[tokio::test]
    async fn test_generate_mock_requires_topic() {
        let h = harness();
        let response = send(&h, tool_call(5, "generate_mock", json!({}))).await;
        assert_eq!(response["error"]["code"], codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_session_info_reads_ambient_context() {
        let h = harness();
        send(&h, tool_call(6, "check_version", json!({}))).await;
        let response = send(&h, tool_call(7, "session_info", json!({}))).await;

        let info: Value = serde_json::from_str(&text(&response)).unwrap();
        assert_eq!(info["session_id"], h.id.to_string());
        assert_eq!(info["calls"], 2);
    }

    #[tokio::test]
    async fn test_session_info_outside_scope_fails() {
        let h = harness();
        let err = h
            .handler
            .process(tool_call(8, "session_info", json!({})), h.id)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Failed(_)));
    }

    #[tokio::test]
    async fn test_end_session_signals_close() {
        let mut h = harness();
        send(&h, tool_call(9, "end_session", json!({}))).await;
        assert_eq!(h.closes.recv().await, Some(h.id));
    }

    #[tokio::test]
    async fn test_unknown_method_and_tool() {
        let h = harness();
        let response = send(&h, json!({"jsonrpc": "2.0", "id": 10, "method": "resources/list"})).await;
        assert_eq!(response["error"]["code"], codes::METHOD_NOT_FOUND);

        let response = send(&h, tool_call(11, "pay_invoice", json!({}))).await;
        assert_eq!(response["error"]["code"], codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_rejected_tool_calls_are_not_counted() {
        let h = harness();
        send(&h, tool_call(1, "pay_invoice", json!({}))).await;
        send(&h, tool_call(2, "generate_mock", json!({"topic": 7}))).await;
        send(&h, json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {}})).await;

        let response = send(&h, tool_call(4, "session_info", json!({}))).await;
        let info: Value = serde_json::from_str(&text(&response)).unwrap();
        assert_eq!(info["calls"], 1);
    }

    #[tokio::test]
    async fn test_invalid_message() {
        let h = harness();
        let response = send(&h, json!([1, 2, 3])).await;
        assert_eq!(response["error"]["code"], codes::INVALID_REQUEST);
        assert_eq!(response["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_handlers_are_isolated() {
        let a = harness();
        let b = harness();

        send(&a, tool_call(1, "check_version", json!({}))).await;
        send(&a, tool_call(2, "check_version", json!({}))).await;
        let info: Value =
            serde_json::from_str(&text(&send(&b, tool_call(3, "session_info", json!({}))).await))
                .unwrap();

        assert_eq!(info["calls"], 1);
        assert_eq!(info["session_id"], b.id.to_string());
    }
}
