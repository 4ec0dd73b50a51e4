//! Conversation state store
//!
//! Holds the two parallel histories of a session: the transcript sent to the
//! model and the display entries shown on the page. Values are immutable
//! snapshots; every append returns a new `Conversation` with the version
//! bumped and leaves the receiver untouched.

mod entry;

pub use entry::{DisplayEntry, DisplayRole, EntryId, Fragment, Role, TranscriptEntry};

use serde::Serialize;
use std::sync::Arc;

/// One versioned snapshot of a session's histories
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    version: u64,
    transcript: Arc<Vec<TranscriptEntry>>,
    display: Arc<Vec<DisplayEntry>>,
}

/// Borrowed, serializable view of a snapshot
#[derive(Debug, Serialize)]
pub struct ConversationView<'a> {
    pub version: u64,
    pub transcript: &'a [TranscriptEntry],
    pub display: &'a [DisplayEntry],
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot with a user turn appended to both histories.
    ///
    /// Callers drop whitespace-only input before getting here.
    #[must_use]
    pub fn append_user(&self, id: EntryId, text: &str) -> Self {
        self.extended(
            TranscriptEntry::user(id.clone(), text),
            DisplayEntry::user(id, text),
        )
    }

    /// Snapshot with a completed assistant reply appended to both histories
    #[must_use]
    pub fn append_assistant(&self, id: EntryId, text: &str) -> Self {
        self.extended(
            TranscriptEntry::assistant(id.clone(), text),
            DisplayEntry::bot(id, text),
        )
    }

    fn extended(&self, entry: TranscriptEntry, display: DisplayEntry) -> Self {
        let mut transcript = Vec::with_capacity(self.transcript.len() + 1);
        transcript.extend_from_slice(&self.transcript);
        transcript.push(entry);

        let mut shown = Vec::with_capacity(self.display.len() + 1);
        shown.extend_from_slice(&self.display);
        shown.push(display);

        Self {
            version: self.version + 1,
            transcript: Arc::new(transcript),
            display: Arc::new(shown),
        }
    }

    pub fn read(&self) -> (&[TranscriptEntry], &[DisplayEntry]) {
        (self.transcript.as_slice(), self.display.as_slice())
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        self.transcript.as_slice()
    }

    pub fn display(&self) -> &[DisplayEntry] {
        self.display.as_slice()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn view(&self) -> ConversationView<'_> {
        let (transcript, display) = self.read();
        ConversationView {
            version: self.version,
            transcript,
            display,
        }
    }

    /// The context for a completion: the system entry, then the transcript
    pub fn completion_context(&self, system: TranscriptEntry) -> Vec<TranscriptEntry> {
        let mut context = Vec::with_capacity(self.transcript.len() + 1);
        context.push(system);
        context.extend_from_slice(&self.transcript);
        context
    }

    /// Whether every transcript entry has its display counterpart, in order
    pub fn is_consistent(&self) -> bool {
        self.transcript.len() == self.display.len()
            && self.transcript.iter().zip(self.display.iter()).all(|(t, d)| {
                let role_matches = matches!(
                    (t.role, d.role),
                    (Role::User, DisplayRole::User) | (Role::Assistant, DisplayRole::Assistant)
                );
                role_matches
                    && t.id.as_ref() == Some(&d.id)
                    && d.display.text() == Some(t.content.as_str())
            })
    }
}
