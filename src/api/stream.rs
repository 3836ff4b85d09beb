//! Server-sent event stream for out-of-band session notifications.

use std::convert::Infallible;

use axum::{
    extract::State,
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, StreamExt};
use tracing::debug;

use super::handlers::{session_header, AppState};
use super::types::ApiError;

/// Open the notification stream of an existing session.
///
/// The stream ends when the session starts closing.
pub async fn open_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let subscription = state
        .manager
        .open_stream(session_header(&headers))
        .map_err(|e| {
            debug!(error = %e, "Stream request rejected");
            ApiError::from(e)
        })?;

    debug!(session_id = %subscription.id(), "Notification stream opened");

    let events = subscription
        .into_stream()
        .map(|message| Ok(Event::default().event("message").data(message.to_string())));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
