//! Server-Sent Events support

use super::types::SessionView;
use crate::runtime::SseEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

/// Convert broadcast stream to SSE stream.
///
/// The stream ends when the session's broadcast closes or `closing` fires.
pub fn sse_stream(
    init_event: SseEvent,
    broadcast_rx: tokio::sync::broadcast::Receiver<SseEvent>,
    closing: CancellationToken,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Create stream that starts with init event then broadcasts
    let init = futures::stream::once(async move { Ok(sse_event_to_axum(init_event)) });

    let broadcasts = BroadcastStream::new(broadcast_rx).map(|result| {
        let event = match result {
            Ok(event) => event,
            // Client fell behind; it should refetch the session
            Err(BroadcastStreamRecvError::Lagged(skipped)) => SseEvent::Error {
                message: format!("Missed {skipped} updates; reload the session"),
            },
        };
        Ok(sse_event_to_axum(event))
    });

    let combined = init
        .chain(broadcasts)
        .take_until(closing.cancelled_owned());

    Sse::new(combined).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn sse_event_to_axum(event: SseEvent) -> Event {
    let (event_type, data) = event_payload(event);
    Event::default().event(event_type).data(data.to_string())
}

fn event_payload(event: SseEvent) -> (&'static str, serde_json::Value) {
    match event {
        SseEvent::Init { snapshot } => (
            "init",
            json!({
                "type": "init",
                "session_id": snapshot.session_id,
                "model": snapshot.model_id,
                "session": SessionView::from(&snapshot).to_json(),
            }),
        ),
        SseEvent::Message { entry } => (
            "message",
            json!({
                "type": "message",
                "entry": entry
            }),
        ),
        SseEvent::Pending { entry } => (
            "pending",
            json!({
                "type": "pending",
                "entry": entry
            }),
        ),
        SseEvent::StateChange { state } => (
            "state_change",
            json!({
                "type": "state_change",
                "state": state
            }),
        ),
        SseEvent::TurnDone { turn_id } => (
            "turn_done",
            json!({
                "type": "turn_done",
                "turn_id": turn_id
            }),
        ),
        SseEvent::TurnFailed {
            turn_id,
            message,
            error_kind,
        } => (
            "turn_failed",
            json!({
                "type": "turn_failed",
                "turn_id": turn_id,
                "message": message,
                "error_kind": error_kind,
                "retryable": error_kind.is_retryable()
            }),
        ),
        SseEvent::Error { message } => (
            "error",
            json!({
                "type": "error",
                "message": message
            }),
        ),
    }
}
