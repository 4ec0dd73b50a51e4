//! API request and response types

use crate::conversation::{ConversationView, DisplayEntry};
use crate::llm::ModelInfo;
use crate::runtime::SessionSnapshot;
use crate::state_machine::TurnState;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// Response for chat action; `message` is the reply placeholder, or
/// `None` when the input was empty
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub message: Option<DisplayEntry>,
}

/// Response for session creation
#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub model: String,
}

/// Full session view
#[derive(Debug, Serialize)]
pub struct SessionView<'a> {
    #[serde(flatten)]
    pub conversation: ConversationView<'a>,
    pub pending: Option<&'a DisplayEntry>,
    pub state: &'a TurnState,
}

impl<'a> From<&'a SessionSnapshot> for SessionView<'a> {
    fn from(snapshot: &'a SessionSnapshot) -> Self {
        Self {
            conversation: snapshot.conversation.view(),
            pending: snapshot.pending.as_ref(),
            state: &snapshot.state,
        }
    }
}

impl SessionView<'_> {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Response for model list
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
    pub default: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
