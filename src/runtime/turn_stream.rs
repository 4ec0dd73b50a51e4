//! Folding a completion stream into accumulated text updates

use super::traits::LlmClient;
use crate::conversation::EntryId;
use crate::llm::{CompletionStream, LlmError, LlmRequest, StreamChunk};
use crate::state_machine::Event;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

/// Everything received so far for one reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUpdate {
    pub content: String,
    pub done: bool,
}

/// Turn a chunk stream into accumulated updates.
///
/// Each non-empty delta yields the full text so far. The stream ends with
/// exactly one `done` update or one error. A stream that closes without an
/// explicit finish is treated as finished.
pub fn text_updates(stream: CompletionStream) -> impl Stream<Item = Result<TextUpdate, LlmError>> + Send {
    futures::stream::unfold(
        Some((stream, String::new())),
        |state| async move {
            let (mut stream, mut content) = state?;
            loop {
                match stream.next().await {
                    Some(Ok(StreamChunk::Text(delta))) => {
                        if delta.is_empty() {
                            continue;
                        }
                        content.push_str(&delta);
                        let update = TextUpdate {
                            content: content.clone(),
                            done: false,
                        };
                        return Some((Ok(update), Some((stream, content))));
                    }
                    Some(Ok(StreamChunk::Done { .. })) | None => {
                        return Some((Ok(TextUpdate { content, done: true }), None));
                    }
                    Some(Err(e)) => return Some((Err(e), None)),
                }
            }
        },
    )
}

/// Drive one completion for `turn_id`, forwarding its progress as events.
///
/// Events are sent in arrival order; sending stops once the session's
/// event channel is closed.
pub async fn stream_turn<L: LlmClient + ?Sized>(
    llm: &L,
    request: &LlmRequest,
    turn_id: EntryId,
    event_tx: mpsc::Sender<Event>,
) {
    let stream = match llm.stream(request).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = event_tx.send(failed(&turn_id, e)).await;
            return;
        }
    };

    let mut updates = std::pin::pin!(text_updates(stream));
    while let Some(update) = updates.next().await {
        let event = match update {
            Ok(TextUpdate {
                content,
                done: false,
            }) => Event::StreamUpdate {
                turn_id: turn_id.clone(),
                content,
            },
            Ok(TextUpdate { content, done: true }) => Event::StreamDone {
                turn_id: turn_id.clone(),
                content,
            },
            Err(e) => failed(&turn_id, e),
        };
        if event_tx.send(event).await.is_err() {
            tracing::debug!(turn_id = %turn_id, "Session gone, dropping completion");
            return;
        }
    }
}

fn failed(turn_id: &EntryId, error: LlmError) -> Event {
    Event::StreamFailed {
        turn_id: turn_id.clone(),
        message: error.message,
        error_kind: error.kind,
    }
}
