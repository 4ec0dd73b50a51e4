//! Transcript and display entry types

use crate::llm::{LlmMessage, MessageRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier shared by a transcript entry and its display counterpart
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Author of a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl From<Role> for MessageRole {
    fn from(role: Role) -> Self {
        match role {
            Role::System => MessageRole::System,
            Role::User => MessageRole::User,
            Role::Assistant => MessageRole::Assistant,
        }
    }
}

/// Model-facing entry: exactly what is sent as context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntryId>,
    pub role: Role,
    pub content: String,
}

impl TranscriptEntry {
    pub fn user(id: EntryId, content: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(id: EntryId, content: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn to_llm_message(&self) -> LlmMessage {
        LlmMessage::new(self.role.into(), self.content.clone())
    }
}

/// Author of a display entry. System entries are never displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayRole {
    User,
    Assistant,
}

/// What the page renders for an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fragment {
    UserMessage { text: String },
    BotMessage { text: String },
    /// Spinner shown until the first text arrives
    Loading,
}

impl Fragment {
    pub fn text(&self) -> Option<&str> {
        match self {
            Fragment::UserMessage { text } | Fragment::BotMessage { text } => Some(text),
            Fragment::Loading => None,
        }
    }
}

/// UI-facing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayEntry {
    pub id: EntryId,
    pub role: DisplayRole,
    pub display: Fragment,
    pub created_at: DateTime<Utc>,
}

impl DisplayEntry {
    pub fn user(id: EntryId, text: impl Into<String>) -> Self {
        Self {
            id,
            role: DisplayRole::User,
            display: Fragment::UserMessage { text: text.into() },
            created_at: Utc::now(),
        }
    }

    pub fn bot(id: EntryId, text: impl Into<String>) -> Self {
        Self {
            id,
            role: DisplayRole::Assistant,
            display: Fragment::BotMessage { text: text.into() },
            created_at: Utc::now(),
        }
    }

    /// Placeholder returned while a reply is pending
    pub fn loading(id: EntryId) -> Self {
        Self {
            id,
            role: DisplayRole::Assistant,
            display: Fragment::Loading,
            created_at: Utc::now(),
        }
    }

    /// Same entry with new content, keeping id and creation time
    #[must_use]
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        let display = match self.role {
            DisplayRole::User => Fragment::UserMessage { text: text.into() },
            DisplayRole::Assistant => Fragment::BotMessage { text: text.into() },
        };
        Self {
            id: self.id.clone(),
            role: self.role,
            display,
            created_at: self.created_at,
        }
    }
}
