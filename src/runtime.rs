//! Runtime for chat sessions
//!
//! Each session is an actor task that owns its conversation and turn state.
//! Handlers talk to it through a command channel and observe it through a
//! broadcast of `SseEvent`s.

mod executor;
pub mod traits;
pub mod turn_stream;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;
pub use traits::*;

use crate::conversation::{Conversation, DisplayEntry, EntryId};
use crate::llm::LlmErrorKind;
use crate::state_machine::{SessionContext, TransitionError, TurnState};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How long a session may sit with no subscriber and no input before it is reaped
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// How often idle sessions are looked for
pub const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Requests handled by a session actor
#[derive(Debug)]
pub enum Command {
    SendMessage {
        text: String,
        reply: oneshot::Sender<Result<DisplayEntry, TransitionError>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Point-in-time copy of a session
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub model_id: String,
    pub conversation: Conversation,
    pub pending: Option<DisplayEntry>,
    pub state: TurnState,
}

/// Events sent to SSE clients
#[derive(Debug, Clone)]
pub enum SseEvent {
    Init {
        snapshot: SessionSnapshot,
    },
    /// A display entry was appended
    Message {
        entry: DisplayEntry,
    },
    /// The reply placeholder changed
    Pending {
        entry: DisplayEntry,
    },
    StateChange {
        state: TurnState,
    },
    TurnDone {
        turn_id: EntryId,
    },
    TurnFailed {
        turn_id: EntryId,
        message: String,
        error_kind: LlmErrorKind,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Session has stopped")]
    Closed,
    #[error(transparent)]
    Rejected(#[from] TransitionError),
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub command_tx: mpsc::Sender<Command>,
    pub broadcast_tx: broadcast::Sender<SseEvent>,
}

struct SessionEntry {
    handle: SessionHandle,
    /// Last input, subscription, or sighting of a live subscriber
    last_active: Instant,
}

/// Manager for all session runtimes
pub struct SessionManager {
    llm_client: Arc<dyn LlmClient>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    /// Cancelled on server shutdown; ends every open event stream
    closing: CancellationToken,
}

impl SessionManager {
    pub fn new(llm_client: Arc<dyn LlmClient>) -> Self {
        Self {
            llm_client,
            sessions: RwLock::new(HashMap::new()),
            closing: CancellationToken::new(),
        }
    }

    /// Start a fresh session with empty histories
    pub async fn create_session(&self) -> SessionContext {
        let session_id = uuid::Uuid::new_v4().to_string();
        let context = SessionContext::new(&session_id, self.llm_client.model_id());

        let (command_tx, command_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(256);

        let runtime = SessionRuntime::new(
            context.clone(),
            self.llm_client.clone(),
            command_rx,
            broadcast_tx.clone(),
        );

        tokio::spawn(async move {
            runtime.run().await;
        });

        self.sessions.write().await.insert(
            session_id,
            SessionEntry {
                handle: SessionHandle {
                    command_tx,
                    broadcast_tx,
                },
                last_active: Instant::now(),
            },
        );

        context
    }

    async fn handle(&self, session_id: &str) -> Result<SessionHandle, SessionError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Look up a session and mark it active
    async fn touch(&self, session_id: &str) -> Result<SessionHandle, SessionError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        entry.last_active = Instant::now();
        Ok(entry.handle.clone())
    }

    /// Submit user input.
    ///
    /// Whitespace-only input is dropped without reaching the session and
    /// yields `None`. Otherwise returns the reply placeholder.
    pub async fn send_message(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<Option<DisplayEntry>, SessionError> {
        let handle = self.touch(session_id).await?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        let (reply, rx) = oneshot::channel();
        handle
            .command_tx
            .send(Command::SendMessage {
                text: text.to_string(),
                reply,
            })
            .await
            .map_err(|_| SessionError::Closed)?;

        let placeholder = rx.await.map_err(|_| SessionError::Closed)??;
        Ok(Some(placeholder))
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, SessionError> {
        let handle = self.handle(session_id).await?;
        Self::request_snapshot(&handle).await
    }

    async fn request_snapshot(handle: &SessionHandle) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        handle
            .command_tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Subscribe to session updates.
    ///
    /// The receiver is created before the snapshot is taken, so nothing
    /// between the two is missed; clients reconcile repeats by entry id.
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<(SessionSnapshot, broadcast::Receiver<SseEvent>), SessionError> {
        let handle = self.touch(session_id).await?;
        let rx = handle.broadcast_tx.subscribe();
        let snapshot = Self::request_snapshot(&handle).await?;
        Ok((snapshot, rx))
    }

    /// Token that fires when the server begins shutting down
    pub fn closing(&self) -> CancellationToken {
        self.closing.clone()
    }

    /// End a session. Its actor stops once the handle is dropped, which
    /// also cancels any in-flight completion.
    pub async fn end_session(&self, session_id: &str) -> Result<(), SessionError> {
        if self.sessions.write().await.remove(session_id).is_none() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        tracing::info!(session_id = %session_id, "Session ended");
        Ok(())
    }

    /// End sessions with no subscriber that have been inactive for `idle_timeout`.
    ///
    /// Returns how many were removed.
    pub async fn reap_idle(&self, idle_timeout: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();

        sessions.retain(|session_id, entry| {
            if entry.handle.broadcast_tx.receiver_count() > 0 {
                entry.last_active = now;
                return true;
            }
            let keep = now.duration_since(entry.last_active) < idle_timeout;
            if !keep {
                tracing::info!(session_id = %session_id, "Reaping idle session");
            }
            keep
        });

        before - sessions.len()
    }

    /// Periodically reap idle sessions until shutdown or until the manager is dropped
    pub fn spawn_reaper(
        self: &Arc<Self>,
        idle_timeout: Duration,
        every: Duration,
    ) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        let closing = self.closing.clone();

        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(every);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = closing.cancelled() => break,
                    _ = ticks.tick() => {
                        let Some(manager) = manager.upgrade() else { break };
                        let reaped = manager.reap_idle(idle_timeout).await;
                        if reaped > 0 {
                            tracing::debug!(reaped, "Reaped idle sessions");
                        }
                    }
                }
            }
        })
    }

    /// End every session and close all event streams
    pub async fn shutdown(&self) {
        self.closing.cancel();
        let mut sessions = self.sessions.write().await;
        tracing::info!(count = sessions.len(), "Ending all sessions");
        sessions.clear();
    }

    #[cfg(test)]
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
