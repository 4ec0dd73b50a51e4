//! Events that can occur in a session

use crate::conversation::EntryId;
use crate::llm::LlmErrorKind;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserMessage {
        text: String,
        /// Id for the user's transcript and display entries
        user_entry_id: EntryId,
        /// Id for the reply placeholder and, later, the committed reply
        reply_id: EntryId,
    },

    // Completion stream events
    StreamUpdate {
        turn_id: EntryId,
        /// Accumulated text so far, not the latest delta
        content: String,
    },
    StreamDone {
        turn_id: EntryId,
        content: String,
    },
    StreamFailed {
        turn_id: EntryId,
        message: String,
        error_kind: LlmErrorKind,
    },
}
