//! Turn state types

use crate::conversation::EntryId;
use crate::llm::LlmErrorKind;
use serde::Serialize;

/// Where a session is in its current turn.
///
/// `Idle` is both the initial state and the state after a reply has been
/// committed. `Failed` keeps the last failure for display but otherwise
/// accepts a new message exactly like `Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnState {
    #[default]
    Idle,

    /// User turn recorded, completion requested, no text received yet
    AwaitingResponse { turn_id: EntryId },

    /// Text is arriving; `content` is everything received so far
    Streaming {
        turn_id: EntryId,
        #[serde(skip_serializing)]
        content: String,
    },

    /// The completion request failed; the user turn stays recorded
    Failed {
        turn_id: EntryId,
        message: String,
        error_kind: LlmErrorKind,
    },
}

impl TurnState {
    /// Whether a reply is in flight
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            TurnState::AwaitingResponse { .. } | TurnState::Streaming { .. }
        )
    }

    /// Turn whose stream events are currently accepted
    pub fn active_turn(&self) -> Option<&EntryId> {
        match self {
            TurnState::AwaitingResponse { turn_id } | TurnState::Streaming { turn_id, .. } => {
                Some(turn_id)
            }
            TurnState::Idle | TurnState::Failed { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::AwaitingResponse { .. } => "awaiting_response",
            TurnState::Streaming { .. } => "streaming",
            TurnState::Failed { .. } => "failed",
        }
    }
}

/// Per-session context, fixed for the session's lifetime
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub model_id: String,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            model_id: model_id.into(),
        }
    }
}
