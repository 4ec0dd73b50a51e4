//! Pure state transition function
//!
//! Given the same state and event this always yields the same result and
//! performs no I/O. The runtime executes the returned effects in order.

use super::{Effect, Event, TurnState};
use crate::conversation::EntryId;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: TurnState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: TurnState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Message is empty")]
    EmptyMessage,
    #[error("A reply is still streaming; wait for it to finish before sending another message")]
    TurnInProgress,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

pub fn transition(state: &TurnState, event: Event) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // User messages
        // ============================================================
        (
            TurnState::Idle | TurnState::Failed { .. },
            Event::UserMessage {
                text,
                user_entry_id,
                reply_id,
            },
        ) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(TransitionError::EmptyMessage);
            }

            // AppendUser runs before RequestCompletion so the request
            // includes the new turn.
            Ok(TransitionResult::new(TurnState::AwaitingResponse {
                turn_id: reply_id.clone(),
            })
            .with_effect(Effect::append_user(user_entry_id, text))
            .with_effect(Effect::OpenPending {
                turn_id: reply_id.clone(),
            })
            .with_effect(Effect::RequestCompletion { turn_id: reply_id }))
        }

        (TurnState::AwaitingResponse { .. } | TurnState::Streaming { .. }, Event::UserMessage { .. }) => {
            Err(TransitionError::TurnInProgress)
        }

        // ============================================================
        // Completion stream
        // ============================================================
        (_, Event::StreamUpdate { turn_id, content }) => {
            expect_active(state, &turn_id, "stream update")?;
            Ok(TransitionResult::new(TurnState::Streaming {
                turn_id: turn_id.clone(),
                content: content.clone(),
            })
            .with_effect(Effect::UpdatePending { turn_id, content }))
        }

        (_, Event::StreamDone { turn_id, content }) => {
            expect_active(state, &turn_id, "stream completion")?;
            Ok(TransitionResult::new(TurnState::Idle)
                .with_effect(Effect::commit_assistant(turn_id.clone(), content))
                .with_effect(Effect::NotifyTurnDone { turn_id }))
        }

        (
            _,
            Event::StreamFailed {
                turn_id,
                message,
                error_kind,
            },
        ) => {
            expect_active(state, &turn_id, "stream failure")?;
            Ok(TransitionResult::new(TurnState::Failed {
                turn_id: turn_id.clone(),
                message: message.clone(),
                error_kind,
            })
            .with_effect(Effect::DiscardPending {
                turn_id: turn_id.clone(),
            })
            .with_effect(Effect::NotifyTurnFailed {
                turn_id,
                message,
                error_kind,
            }))
        }
    }
}

/// Stream events are only accepted for the turn currently in flight
fn expect_active(state: &TurnState, turn_id: &EntryId, what: &str) -> Result<(), TransitionError> {
    match state.active_turn() {
        Some(active) if active == turn_id => Ok(()),
        Some(active) => Err(TransitionError::InvalidTransition(format!(
            "{what} for turn {turn_id} while turn {active} is active"
        ))),
        None => Err(TransitionError::InvalidTransition(format!(
            "{what} for turn {turn_id} in state {}",
            state.name()
        ))),
    }
}
