//! Session runtime executor

use super::traits::LlmClient;
use super::turn_stream::stream_turn;
use super::{Command, SessionSnapshot, SseEvent};

use crate::conversation::{Conversation, DisplayEntry, EntryId, TranscriptEntry};
use crate::llm::LlmRequest;
use crate::state_machine::{transition, Effect, Event, SessionContext, TransitionError, TurnState};
use crate::system_prompt::system_entry;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Actor owning one session's state; all mutation happens on its task
pub struct SessionRuntime<L>
where
    L: LlmClient + 'static,
{
    context: SessionContext,
    state: TurnState,
    conversation: Conversation,
    /// Reply placeholder shown while a turn is in flight; never part of the snapshot
    pending: Option<DisplayEntry>,
    llm_client: Arc<L>,
    command_rx: mpsc::Receiver<Command>,
    event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<SseEvent>,
    /// Cancelled when the session ends; stops in-flight completions
    cancel: CancellationToken,
}

impl<L> SessionRuntime<L>
where
    L: LlmClient + 'static,
{
    pub fn new(
        context: SessionContext,
        llm_client: L,
        command_rx: mpsc::Receiver<Command>,
        broadcast_tx: broadcast::Sender<SseEvent>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(64);
        Self {
            context,
            state: TurnState::Idle,
            conversation: Conversation::new(),
            pending: None,
            llm_client: Arc::new(llm_client),
            command_rx,
            event_rx,
            event_tx,
            broadcast_tx,
            cancel: CancellationToken::new(),
        }
    }

    pub async fn run(mut self) {
        tracing::info!(session_id = %self.context.session_id, model = %self.context.model_id, "Starting session runtime");

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.event_rx.recv() => {
                    if let Err(e) = self.process_event(event) {
                        // Late events from a turn that is no longer active
                        tracing::warn!(session_id = %self.context.session_id, error = %e, "Dropping stream event");
                    }
                }
            }
        }

        self.cancel.cancel();
        tracing::info!(session_id = %self.context.session_id, "Session runtime stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendMessage { text, reply } => {
                let reply_id = EntryId::generate();
                let event = Event::UserMessage {
                    text,
                    user_entry_id: EntryId::generate(),
                    reply_id: reply_id.clone(),
                };
                let result = self.process_event(event).map(|()| {
                    self.pending
                        .clone()
                        .unwrap_or_else(|| DisplayEntry::loading(reply_id))
                });
                if let Err(e) = &result {
                    tracing::debug!(session_id = %self.context.session_id, error = %e, "Message rejected");
                }
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.context.session_id.clone(),
            model_id: self.context.model_id.clone(),
            conversation: self.conversation.clone(),
            pending: self.pending.clone(),
            state: self.state.clone(),
        }
    }

    fn process_event(&mut self, event: Event) -> Result<(), TransitionError> {
        // Pure state transition
        let result = transition(&self.state, event)?;

        let old_state = std::mem::replace(&mut self.state, result.new_state);

        for effect in result.effects {
            self.execute_effect(effect);
        }

        if old_state.name() != self.state.name() {
            let _ = self.broadcast_tx.send(SseEvent::StateChange {
                state: self.state.clone(),
            });
        }

        Ok(())
    }

    fn execute_effect(&mut self, effect: Effect) {
        tracing::trace!(session_id = %self.context.session_id, turn_id = %effect.turn_id(), ?effect, "Executing effect");

        match effect {
            Effect::AppendUser { id, text } => {
                self.conversation = self.conversation.append_user(id, &text);
                self.broadcast_last_display();
            }

            Effect::OpenPending { turn_id } => {
                let placeholder = DisplayEntry::loading(turn_id);
                self.pending = Some(placeholder.clone());
                let _ = self
                    .broadcast_tx
                    .send(SseEvent::Pending { entry: placeholder });
            }

            Effect::RequestCompletion { turn_id } => self.request_completion(turn_id),

            Effect::UpdatePending { turn_id, content } => {
                let Some(current) = self.pending.as_ref().filter(|p| p.id == turn_id) else {
                    return;
                };
                let updated = current.with_text(content);
                self.pending = Some(updated.clone());
                let _ = self.broadcast_tx.send(SseEvent::Pending { entry: updated });
            }

            Effect::CommitAssistant { turn_id, content } => {
                self.conversation = self.conversation.append_assistant(turn_id, &content);
                self.pending = None;
                self.broadcast_last_display();
            }

            Effect::DiscardPending { .. } => {
                self.pending = None;
            }

            Effect::NotifyTurnDone { turn_id } => {
                let _ = self.broadcast_tx.send(SseEvent::TurnDone { turn_id });
            }

            Effect::NotifyTurnFailed {
                turn_id,
                message,
                error_kind,
            } => {
                tracing::error!(
                    session_id = %self.context.session_id,
                    turn_id = %turn_id,
                    error_kind = ?error_kind,
                    error = %message,
                    "Completion failed"
                );
                let _ = self.broadcast_tx.send(SseEvent::TurnFailed {
                    turn_id,
                    message,
                    error_kind,
                });
            }
        }
    }

    fn broadcast_last_display(&self) {
        if let Some(entry) = self.conversation.display().last() {
            let _ = self.broadcast_tx.send(SseEvent::Message {
                entry: entry.clone(),
            });
        }
    }

    /// Spawn the streaming request for a turn.
    ///
    /// The context is captured from the current snapshot, which already
    /// holds the new user entry.
    fn request_completion(&self, turn_id: EntryId) {
        let messages = self
            .conversation
            .completion_context(system_entry())
            .iter()
            .map(TranscriptEntry::to_llm_message)
            .collect();
        let request = LlmRequest::new(messages);

        let llm_client = self.llm_client.clone();
        let event_tx = self.event_tx.clone();
        let cancel = self.cancel.clone();
        let session_id = self.context.session_id.clone();

        tokio::spawn(async move {
            tracing::info!(
                session_id = %session_id,
                turn_id = %turn_id,
                messages = request.messages.len(),
                "Making LLM request (background)"
            );

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::info!(session_id = %session_id, "LLM request cancelled");
                }

                () = stream_turn(llm_client.as_ref(), &request, turn_id, event_tx) => {}
            }
        });
    }
}
