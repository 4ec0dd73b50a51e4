//! Effects produced by state transitions

use crate::conversation::EntryId;
use crate::llm::LlmErrorKind;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Append the user turn to both histories
    AppendUser { id: EntryId, text: String },

    /// Put a loading placeholder in the pending slot
    OpenPending { turn_id: EntryId },

    /// Start the streaming completion for the turn
    RequestCompletion { turn_id: EntryId },

    /// Show the partial reply in the pending slot
    UpdatePending { turn_id: EntryId, content: String },

    /// Append the finished reply to both histories and clear the pending slot
    CommitAssistant { turn_id: EntryId, content: String },

    /// Clear the pending slot without recording anything
    DiscardPending { turn_id: EntryId },

    /// Tell connected clients the turn finished
    NotifyTurnDone { turn_id: EntryId },

    /// Tell connected clients the turn failed
    NotifyTurnFailed {
        turn_id: EntryId,
        message: String,
        error_kind: LlmErrorKind,
    },
}

impl Effect {
    pub fn append_user(id: EntryId, text: impl Into<String>) -> Self {
        Effect::AppendUser {
            id,
            text: text.into(),
        }
    }

    pub fn commit_assistant(turn_id: EntryId, content: impl Into<String>) -> Self {
        Effect::CommitAssistant {
            turn_id,
            content: content.into(),
        }
    }

    pub fn turn_id(&self) -> &EntryId {
        match self {
            Effect::AppendUser { id, .. } => id,
            Effect::OpenPending { turn_id }
            | Effect::RequestCompletion { turn_id }
            | Effect::UpdatePending { turn_id, .. }
            | Effect::CommitAssistant { turn_id, .. }
            | Effect::DiscardPending { turn_id }
            | Effect::NotifyTurnDone { turn_id }
            | Effect::NotifyTurnFailed { turn_id, .. } => turn_id,
        }
    }
}
