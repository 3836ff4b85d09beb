//! Single-session transport over newline-delimited JSON.
//!
//! Every input line is one message. The first must establish the session;
//! later lines are routed to it as though they carried its id. Responses and
//! the session's notifications are written one per line.
//!
//! The loop ends on EOF (the session is terminated) or when the session is
//! closed from the inside.

use std::io;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{ErrorCategory, MuxError};
use crate::lifecycle::SessionManager;
use crate::protocol::{self, RpcResponse};
use crate::session::{NotificationStream, SessionId};
use crate::Result;

/// Serve one session over the process's stdin and stdout.
pub async fn run(manager: Arc<SessionManager>) -> Result<()> {
    info!("session-mux serving on stdio");
    serve_lines(manager, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Serve one session reading from `reader` and writing to `writer`.
pub async fn serve_lines<R, W>(manager: Arc<SessionManager>, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_lines(writer, out_rx));

    let (closed_tx, mut closed_rx) = watch::channel(false);
    let mut session: Option<SessionId> = None;
    let mut lines = reader.lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            Ok(()) = closed_rx.changed() => {
                debug!("Session closed by handler");
                break;
            }
        };

        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Malformed input line");
                send(&out_tx, failure(&MuxError::from(e), Value::Null));
                continue;
            }
        };
        let request_id = protocol::request_id(&message);
        let header = session.map(|id| id.to_string());

        match manager.handle_message(header.as_deref(), message).await {
            Ok(dispatch) => {
                if dispatch.established {
                    session = Some(dispatch.session_id);
                    match manager.open_stream(Some(&dispatch.session_id.to_string())) {
                        Ok(stream) => {
                            tokio::spawn(forward_notifications(
                                stream,
                                out_tx.clone(),
                                closed_tx.clone(),
                            ));
                        }
                        Err(e) => {
                            debug!(error = %e, "Session ended during establishment");
                            emit(&out_tx, dispatch.response);
                            break;
                        }
                    }
                }
                emit(&out_tx, dispatch.response);
            }
            Err(e) => {
                let ended = session.is_some() && matches!(e, MuxError::UnknownSession(_));
                let id = match e.category() {
                    ErrorCategory::Processing => request_id,
                    _ => Value::Null,
                };
                send(&out_tx, failure(&e, id));
                if ended {
                    break;
                }
            }
        }
    }

    if let Some(id) = session {
        manager.terminate(&id).await?;
    }

    drop(out_tx);
    drop(closed_tx);
    match writer_task.await {
        Ok(result) => result?,
        Err(e) => return Err(MuxError::Io(io::Error::other(e))),
    }

    info!("stdio session finished");
    Ok(())
}

fn failure(err: &MuxError, id: Value) -> Value {
    RpcResponse::failure(id, err.to_rpc_error()).into_value()
}

fn emit(out: &mpsc::UnboundedSender<Value>, message: Option<Value>) {
    if let Some(message) = message {
        send(out, message);
    }
}

fn send(out: &mpsc::UnboundedSender<Value>, message: Value) {
    if out.send(message).is_err() {
        warn!("Output closed; dropping message");
    }
}

/// Copy session notifications to the output until the session closes.
async fn forward_notifications(
    mut stream: NotificationStream,
    out: mpsc::UnboundedSender<Value>,
    closed: watch::Sender<bool>,
) {
    while let Some(message) = stream.next().await {
        if out.send(message).is_err() {
            return;
        }
    }
    closed.send_replace(true);
}

async fn write_lines<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Value>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = message.to_string();
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}
