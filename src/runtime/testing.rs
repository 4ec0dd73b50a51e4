//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use super::{SessionError, SessionManager, SessionSnapshot, SseEvent};
use crate::conversation::DisplayEntry;
use crate::llm::{CompletionStream, LlmError, LlmRequest, StreamChunk};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;

// ============================================================================
// Mock LLM Client
// ============================================================================

enum Script {
    Chunks(Vec<Result<StreamChunk, LlmError>>),
    Refuse(LlmError),
}

/// Mock LLM client that replays queued streams
pub struct MockLlmClient {
    scripts: Mutex<VecDeque<Script>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply streamed as the given deltas, then finished
    pub fn queue_reply(&self, deltas: &[&str]) {
        let mut chunks: Vec<_> = deltas.iter().map(|d| Ok(StreamChunk::text(*d))).collect();
        chunks.push(Ok(StreamChunk::done()));
        self.queue_chunks(chunks);
    }

    /// Queue a raw chunk sequence
    pub fn queue_chunks(&self, chunks: Vec<Result<StreamChunk, LlmError>>) {
        self.scripts.lock().unwrap().push_back(Script::Chunks(chunks));
    }

    /// Queue a request that fails before any text arrives
    pub fn queue_error(&self, error: LlmError) {
        self.scripts.lock().unwrap().push_back(Script::Refuse(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn stream(&self, request: &LlmRequest) -> Result<CompletionStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Chunks(chunks)) => Ok(Box::pin(futures::stream::iter(chunks))),
            Some(Script::Refuse(error)) => Err(error),
            None => Err(LlmError::network("No mock response queued")),
        }
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Channel Mock LLM Client (for timing-sensitive tests)
// ============================================================================

type ChunkSender = mpsc::UnboundedSender<Result<StreamChunk, LlmError>>;
type ChunkReceiver = mpsc::UnboundedReceiver<Result<StreamChunk, LlmError>>;

/// Mock LLM client whose streams are fed by the test
pub struct ChannelLlmClient {
    streams: Mutex<VecDeque<ChunkReceiver>>,
    /// Notified when a request starts (for test synchronization)
    pub request_started: Arc<Notify>,
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl ChannelLlmClient {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(VecDeque::new()),
            request_started: Arc::new(Notify::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Prepare the stream for the next request; chunks sent on the returned
    /// sender arrive as they are sent, and dropping it ends the stream
    pub fn open_turn(&self) -> ChunkSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().push_back(rx);
        tx
    }
}

#[async_trait]
impl LlmClient for ChannelLlmClient {
    async fn stream(&self, request: &LlmRequest) -> Result<CompletionStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let rx = self.streams.lock().unwrap().pop_front();
        self.request_started.notify_one();
        let rx = rx.ok_or_else(|| LlmError::network("No mock stream opened"))?;
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    fn model_id(&self) -> &str {
        "test-model"
    }
}

// ============================================================================
// Test Session
// ============================================================================

/// One live session plus a subscription to its events
pub struct TestSession {
    pub manager: SessionManager,
    pub session_id: String,
    pub events: broadcast::Receiver<SseEvent>,
}

impl TestSession {
    pub async fn start(llm: Arc<dyn LlmClient>) -> Self {
        let manager = SessionManager::new(llm);
        let session_id = manager.create_session().await.session_id;
        let (_, events) = manager.subscribe(&session_id).await.unwrap();
        Self {
            manager,
            session_id,
            events,
        }
    }

    pub async fn send(&self, text: &str) -> Result<Option<DisplayEntry>, SessionError> {
        self.manager.send_message(&self.session_id, text).await
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.manager.snapshot(&self.session_id).await.unwrap()
    }

    /// Collect events up to and including the first one matching `stop`
    pub async fn collect_until(
        &mut self,
        timeout: Duration,
        stop: impl Fn(&SseEvent) -> bool,
    ) -> Option<Vec<SseEvent>> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), self.events.recv()).await {
                Ok(Ok(event)) => {
                    let done = stop(&event);
                    seen.push(event);
                    if done {
                        return Some(seen);
                    }
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                _ => continue,
            }
        }
        None
    }

    /// Wait for the current turn to finish either way
    pub async fn wait_for_turn_end(&mut self) -> Vec<SseEvent> {
        self.collect_until(Duration::from_secs(2), |e| {
            matches!(e, SseEvent::TurnDone { .. } | SseEvent::TurnFailed { .. })
        })
        .await
        .expect("turn should end")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{DisplayRole, Fragment, Role};
    use crate::runtime::{REAP_INTERVAL, SESSION_IDLE_TIMEOUT};
    use crate::llm::{LlmErrorKind, MessageRole};
    use crate::state_machine::{TransitionError, TurnState};
    use crate::system_prompt::SYSTEM_PROMPT;

    fn pending_texts(events: &[SseEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SseEvent::Pending { entry } => entry.display.text().map(str::to_string),
                _ => None,
            })
            .collect()
    }

    fn committed(events: &[SseEvent]) -> Vec<&DisplayEntry> {
        events
            .iter()
            .filter_map(|e| match e {
                SseEvent::Message { entry } => Some(entry),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_reply_streams_then_commits_once() {
        let llm = Arc::new(MockLlmClient::new("test-model"));
        llm.queue_reply(&["Hello", " Dana"]);
        let mut session = TestSession::start(llm.clone()).await;

        let placeholder = session
            .send("Hi, I'm Dana, my son is 6.")
            .await
            .unwrap()
            .expect("placeholder");
        assert_eq!(placeholder.display, Fragment::Loading);
        assert_eq!(placeholder.role, DisplayRole::Assistant);

        let events = session.wait_for_turn_end().await;
        assert!(matches!(events.last(), Some(SseEvent::TurnDone { .. })));
        assert_eq!(pending_texts(&events), vec!["Hello", "Hello Dana"]);

        let messages = committed(&events);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].display.text(), Some("Hi, I'm Dana, my son is 6."));
        assert_eq!(messages[1].display.text(), Some("Hello Dana"));
        assert_eq!(messages[1].id, placeholder.id);

        let snapshot = session.snapshot().await;
        let roles: Vec<_> = snapshot
            .conversation
            .transcript()
            .iter()
            .map(|e| e.role)
            .collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(snapshot.conversation.display().len(), 2);
        assert!(snapshot.conversation.is_consistent());
        assert!(snapshot.pending.is_none());
        assert_eq!(snapshot.state, TurnState::Idle);
    }

    #[tokio::test]
    async fn test_request_starts_with_system_prompt() {
        let llm = Arc::new(MockLlmClient::new("test-model"));
        llm.queue_reply(&["Sorry, I am a demo and cannot do that."]);
        let mut session = TestSession::start(llm.clone()).await;

        session.send("  Book me a flight.\n").await.unwrap();
        session.wait_for_turn_end().await;

        let requests = llm.recorded_requests();
        assert_eq!(requests.len(), 1);
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::System);
        assert_eq!(messages[0].content, SYSTEM_PROMPT);
        assert_eq!(messages[1].role, MessageRole::User);
        assert_eq!(messages[1].content, "Book me a flight.");

        // The system entry is never stored
        let snapshot = session.snapshot().await;
        let transcript = snapshot.conversation.transcript();
        assert!(transcript.iter().all(|e| e.role != Role::System));
        assert_eq!(
            transcript.last().unwrap().content,
            "Sorry, I am a demo and cannot do that."
        );
    }

    #[tokio::test]
    async fn test_second_turn_sees_committed_reply() {
        let llm = Arc::new(MockLlmClient::new("test-model"));
        llm.queue_reply(&["Hello ", "Dana"]);
        llm.queue_reply(&["Try the science museum."]);
        let mut session = TestSession::start(llm.clone()).await;

        session.send("Hi, I'm Dana, my son is 6.").await.unwrap();
        session.wait_for_turn_end().await;
        session.send("Any ideas for Saturday?").await.unwrap();
        session.wait_for_turn_end().await;

        let requests = llm.recorded_requests();
        let second: Vec<_> = requests[1]
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            second,
            vec![
                (MessageRole::System, SYSTEM_PROMPT),
                (MessageRole::User, "Hi, I'm Dana, my son is 6."),
                (MessageRole::Assistant, "Hello Dana"),
                (MessageRole::User, "Any ideas for Saturday?"),
            ]
        );
        assert_eq!(session.snapshot().await.conversation.version(), 4);
    }

    #[tokio::test]
    async fn test_failure_keeps_user_turn_and_session_usable() {
        let llm = Arc::new(MockLlmClient::new("test-model"));
        llm.queue_chunks(vec![
            Ok(StreamChunk::text("Hel")),
            Err(LlmError::network("connection reset")),
        ]);
        llm.queue_reply(&["Back again"]);
        let mut session = TestSession::start(llm.clone()).await;

        session.send("Are you there?").await.unwrap();
        let events = session.wait_for_turn_end().await;
        match events.last() {
            Some(SseEvent::TurnFailed { error_kind, message, .. }) => {
                assert_eq!(*error_kind, LlmErrorKind::Network);
                assert!(message.contains("connection reset"));
            }
            other => panic!("expected TurnFailed, got {other:?}"),
        }

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.conversation.transcript().len(), 1);
        assert_eq!(snapshot.conversation.display().len(), 1);
        assert!(snapshot.pending.is_none());
        assert!(matches!(snapshot.state, TurnState::Failed { .. }));

        // Partial text never reaches the next request
        session.send("Hello?").await.unwrap();
        let events = session.wait_for_turn_end().await;
        assert!(matches!(events.last(), Some(SseEvent::TurnDone { .. })));

        let requests = llm.recorded_requests();
        let roles: Vec<_> = requests[1].messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::System, MessageRole::User, MessageRole::User]
        );
        assert!(requests[1].messages.iter().all(|m| m.content != "Hel"));
    }

    #[tokio::test]
    async fn test_refused_request_fails_turn() {
        let llm = Arc::new(MockLlmClient::new("test-model"));
        llm.queue_error(LlmError::rate_limit("slow down"));
        let mut session = TestSession::start(llm).await;

        session.send("Hi").await.unwrap();
        let events = session.wait_for_turn_end().await;
        assert!(matches!(
            events.last(),
            Some(SseEvent::TurnFailed {
                error_kind: LlmErrorKind::RateLimit,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_busy_session_rejects_second_message() {
        let llm = Arc::new(ChannelLlmClient::new());
        let turn = llm.open_turn();
        let request_started = llm.request_started.clone();
        let mut session = TestSession::start(llm.clone()).await;

        session.send("First").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), request_started.notified())
            .await
            .expect("LLM request should start");

        let err = session.send("Second").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Rejected(TransitionError::TurnInProgress)
        ));

        turn.send(Ok(StreamChunk::text("Done now"))).unwrap();
        turn.send(Ok(StreamChunk::done())).unwrap();
        session.wait_for_turn_end().await;

        let snapshot = session.snapshot().await;
        let texts: Vec<_> = snapshot
            .conversation
            .transcript()
            .iter()
            .map(|e| e.content.as_str())
            .collect();
        assert_eq!(texts, vec!["First", "Done now"]);
        assert_eq!(llm.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_whitespace_input_makes_no_call() {
        let llm = Arc::new(MockLlmClient::new("test-model"));
        let session = TestSession::start(llm.clone()).await;

        assert!(session.send("   \n\t").await.unwrap().is_none());
        assert!(session.send("").await.unwrap().is_none());

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.conversation.version(), 0);
        assert!(snapshot.conversation.transcript().is_empty());
        assert!(llm.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_pending_slot_visible_mid_stream() {
        let llm = Arc::new(ChannelLlmClient::new());
        let turn = llm.open_turn();
        let mut session = TestSession::start(llm.clone()).await;

        let placeholder = session.send("Hi").await.unwrap().unwrap();
        turn.send(Ok(StreamChunk::text("Hel"))).unwrap();
        session
            .collect_until(Duration::from_secs(1), |e| {
                matches!(e, SseEvent::Pending { entry } if entry.display.text() == Some("Hel"))
            })
            .await
            .expect("partial text should arrive");

        let snapshot = session.snapshot().await;
        let pending = snapshot.pending.expect("pending slot");
        assert_eq!(pending.id, placeholder.id);
        assert_eq!(pending.display.text(), Some("Hel"));
        // Only the user turn is in history while the reply streams
        assert_eq!(snapshot.conversation.display().len(), 1);
        assert!(matches!(snapshot.state, TurnState::Streaming { .. }));

        drop(turn);
        let events = session.wait_for_turn_end().await;
        assert!(matches!(events.last(), Some(SseEvent::TurnDone { .. })));
    }

    #[tokio::test]
    async fn test_end_session_cancels_stream() {
        let llm = Arc::new(ChannelLlmClient::new());
        let turn = llm.open_turn();
        let request_started = llm.request_started.clone();
        let session = TestSession::start(llm.clone()).await;

        session.send("Hi").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), request_started.notified())
            .await
            .expect("LLM request should start");

        session.manager.end_session(&session.session_id).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !turn.is_closed() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(turn.is_closed(), "stream should be dropped after session end");

        let err = session.send("Still there?").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let manager = SessionManager::new(Arc::new(MockLlmClient::new("test-model")));
        assert!(matches!(
            manager.snapshot("nope").await,
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            manager.end_session("nope").await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let llm = Arc::new(MockLlmClient::new("test-model"));
        llm.queue_reply(&["One"]);
        let manager = SessionManager::new(llm);
        let a = manager.create_session().await.session_id;
        let b = manager.create_session().await.session_id;
        assert_ne!(a, b);
        assert_eq!(manager.session_count().await, 2);

        let (_, mut events) = manager.subscribe(&a).await.unwrap();
        manager.send_message(&a, "Hello").await.unwrap();
        loop {
            if let SseEvent::TurnDone { .. } = events.recv().await.unwrap() {
                break;
            }
        }

        assert_eq!(manager.snapshot(&a).await.unwrap().conversation.version(), 2);
        assert_eq!(manager.snapshot(&b).await.unwrap().conversation.version(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_session_is_reaped() {
        let manager = Arc::new(SessionManager::new(Arc::new(MockLlmClient::new("test-model"))));
        let abandoned = manager.create_session().await.session_id;
        let watched = manager.create_session().await.session_id;
        let (_, _events) = manager.subscribe(&watched).await.unwrap();
        let reaper = manager.spawn_reaper(SESSION_IDLE_TIMEOUT, REAP_INTERVAL);

        tokio::time::sleep(SESSION_IDLE_TIMEOUT / 2).await;
        assert_eq!(manager.session_count().await, 2);

        tokio::time::sleep(SESSION_IDLE_TIMEOUT + REAP_INTERVAL).await;
        assert_eq!(manager.session_count().await, 1);
        assert!(matches!(
            manager.snapshot(&abandoned).await,
            Err(SessionError::NotFound(_))
        ));
        assert!(manager.snapshot(&watched).await.is_ok());

        manager.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), reaper)
            .await
            .expect("reaper should stop on shutdown")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_input_defers_reaping() {
        let llm = Arc::new(MockLlmClient::new("test-model"));
        llm.queue_reply(&["Hi there"]);
        let manager = SessionManager::new(llm);
        let id = manager.create_session().await.session_id;
        let idle = Duration::from_secs(400);

        tokio::time::advance(Duration::from_secs(300)).await;
        manager.send_message(&id, "Hello").await.unwrap();

        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(manager.reap_idle(idle).await, 0);

        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(manager.reap_idle(idle).await, 1);
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_sessions() {
        let manager = SessionManager::new(Arc::new(MockLlmClient::new("test-model")));
        let id = manager.create_session().await.session_id;
        let closing = manager.closing();
        let (_, mut events) = manager.subscribe(&id).await.unwrap();

        manager.shutdown().await;

        assert!(closing.is_cancelled());
        assert_eq!(manager.session_count().await, 0);
        let closed = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("actor should stop");
        assert!(matches!(closed, Err(broadcast::error::RecvError::Closed)));
    }
}
