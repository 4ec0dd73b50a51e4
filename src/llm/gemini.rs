//! Google Gemini provider implementation
//!
//! Uses the `streamGenerateContent` endpoint with `alt=sse`, which returns one
//! `GenerateContentResponse` JSON object per SSE event. Each object carries the
//! text generated since the previous one.

use super::types::{LlmMessage, LlmRequest, MessageRole, StreamChunk, Usage};
use super::{CompletionStream, LlmError, LlmService};
use async_trait::async_trait;
use eventsource_client as es;
use eventsource_client::Client as _;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const DIRECT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeminiModel {
    Gemini15Pro,
    Gemini15Flash,
}

impl GeminiModel {
    pub fn api_name(self) -> &'static str {
        match self {
            GeminiModel::Gemini15Pro => "gemini-1.5-pro-latest",
            GeminiModel::Gemini15Flash => "gemini-1.5-flash-latest",
        }
    }

    pub fn model_id(self) -> &'static str {
        match self {
            GeminiModel::Gemini15Pro => "gemini-1.5-pro",
            GeminiModel::Gemini15Flash => "gemini-1.5-flash",
        }
    }

    pub fn context_window(self) -> usize {
        match self {
            GeminiModel::Gemini15Pro => 2_097_152,   // 2M
            GeminiModel::Gemini15Flash => 1_048_576, // 1M
        }
    }
}

/// Gemini service implementation
pub struct GeminiService {
    api_key: String,
    model: GeminiModel,
    url: String,
}

impl GeminiService {
    pub fn new(api_key: String, model: GeminiModel, gateway: Option<&str>) -> Result<Self, LlmError> {
        let url = endpoint(model, gateway);
        es::ClientBuilder::for_url(&url)
            .map_err(|e| LlmError::invalid_request(format!("Invalid Gemini endpoint {url}: {e}")))?;

        Ok(Self {
            api_key,
            model,
            url,
        })
    }

    /// Key for the `x-goog-api-key` header. Gateway mode authenticates on
    /// our behalf, so no key is sent.
    fn api_key_header(&self) -> Option<&str> {
        if self.api_key.starts_with("implicit") {
            None
        } else {
            Some(&self.api_key)
        }
    }

    fn translate_request(request: &LlmRequest) -> GeminiRequest {
        let system_instruction = request.system_text().map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiPart { text }],
        });

        let contents = request
            .messages
            .iter()
            .filter_map(|msg: &LlmMessage| {
                let role = match msg.role {
                    MessageRole::System => return None,
                    MessageRole::User => "user",
                    MessageRole::Assistant => "model",
                };
                Some(GeminiContent {
                    role: Some(role.to_string()),
                    parts: vec![GeminiPart {
                        text: msg.content.clone(),
                    }],
                })
            })
            .collect();

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: request.max_tokens.map(|t| GeminiGenerationConfig {
                max_output_tokens: Some(t),
            }),
        }
    }

    fn build_client(&self, body: String) -> Result<impl es::Client, es::Error> {
        // A completion is a one-shot POST; reconnecting would replay it.
        let mut builder = es::ClientBuilder::for_url(&self.url)?
            .method("POST".to_string())
            .body(body)
            .connect_timeout(Duration::from_secs(30))
            .reconnect(es::ReconnectOptions::reconnect(false).build())
            .header("Content-Type", "application/json")?;
        if let Some(key) = self.api_key_header() {
            builder = builder.header("x-goog-api-key", key)?;
        }
        Ok(builder.build())
    }
}

fn endpoint(model: GeminiModel, gateway: Option<&str>) -> String {
    match gateway {
        Some(gw) => format!(
            "{}/gemini/v1beta/models/{}:streamGenerateContent?alt=sse",
            gw.trim_end_matches('/'),
            model.api_name()
        ),
        None => format!(
            "{DIRECT_BASE_URL}/v1beta/models/{}:streamGenerateContent?alt=sse",
            model.api_name()
        ),
    }
}

#[async_trait]
impl LlmService for GeminiService {
    async fn stream(&self, request: &LlmRequest) -> Result<CompletionStream, LlmError> {
        let body = serde_json::to_string(&Self::translate_request(request))
            .map_err(|e| LlmError::invalid_request(format!("Failed to encode request: {e}")))?;

        let client = self
            .build_client(body)
            .map_err(|e| LlmError::invalid_request(format!("Failed to build request: {e}")))?;

        Ok(decode_stream(event_payloads(client)))
    }

    fn model_id(&self) -> &str {
        self.model.model_id()
    }

    fn context_window(&self) -> usize {
        self.model.context_window()
    }
}

fn parse_error_body(status: u16, body: &str) -> LlmError {
    match serde_json::from_str::<GeminiErrorResponse>(body) {
        Ok(resp) => LlmError::from_status(status, &resp.error.message),
        Err(_) => LlmError::from_status(status, body),
    }
}

/// Drive the SSE connection on its own task and forward each event's `data`.
///
/// A non-2xx response or a transport failure is forwarded as one `Err`, after
/// which nothing more is sent. Dropping the returned stream closes the
/// connection.
fn event_payloads(
    client: impl es::Client + 'static,
) -> impl Stream<Item = Result<String, LlmError>> + Send + 'static {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let mut events = client.stream();
        loop {
            let event = tokio::select! {
                () = tx.closed() => {
                    tracing::debug!("Completion stream dropped by consumer");
                    break;
                }
                event = events.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let item = match event {
                Ok(es::SSE::Event(event)) => Ok(event.data),
                Ok(es::SSE::Comment(_) | es::SSE::Connected(_)) => continue,
                // Clean close of the body
                Err(es::Error::Eof | es::Error::StreamClosed) => break,
                Err(es::Error::UnexpectedResponse(response, body)) => {
                    let status = response.status();
                    let body = body
                        .body_bytes()
                        .await
                        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                        .unwrap_or_default();
                    Err(parse_error_body(status, &body))
                }
                Err(es::Error::TimedOut) => Err(LlmError::network("Stream timed out")),
                Err(e) => Err(LlmError::network(format!("Stream interrupted: {e}"))),
            };

            let failed = item.is_err();
            if tx.send(item).await.is_err() {
                tracing::debug!("Completion stream dropped by consumer");
                break;
            }
            if failed {
                break;
            }
        }
    });

    ReceiverStream::new(rx)
}

/// Turn SSE event payloads into completion chunks.
///
/// Ends with exactly one `Done` on a clean close, or with one `Err` if the
/// transport or the provider reports a failure mid-stream.
pub(super) fn decode_stream<S>(payloads: S) -> CompletionStream
where
    S: Stream<Item = Result<String, LlmError>> + Send + 'static,
{
    let state = DecodeState {
        payloads: Box::pin(payloads),
        queue: VecDeque::new(),
        usage: Usage::default(),
        finish_reason: None,
        ended: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queue.pop_front() {
                return Some((item, state));
            }
            if state.ended {
                return None;
            }

            match state.payloads.next().await {
                Some(Ok(payload)) => {
                    if let Err(e) = state.absorb_payload(&payload) {
                        state.fail(e);
                    }
                }
                Some(Err(e)) => state.fail(e),
                None => {
                    state.ended = true;
                    state.queue.push_back(Ok(StreamChunk::Done {
                        finish_reason: state.finish_reason.take(),
                        usage: state.usage,
                    }));
                }
            }
        }
    }))
}

struct DecodeState {
    payloads: Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>,
    queue: VecDeque<Result<StreamChunk, LlmError>>,
    usage: Usage,
    finish_reason: Option<String>,
    ended: bool,
}

impl DecodeState {
    fn absorb_payload(&mut self, payload: &str) -> Result<(), LlmError> {
        let chunk: GeminiStreamChunk = serde_json::from_str(payload).map_err(|e| {
            LlmError::unknown(format!("Failed to parse stream chunk: {e} - body: {payload}"))
        })?;

        if let Some(error) = chunk.error {
            let status = error.code.and_then(|c| u16::try_from(c).ok()).unwrap_or(500);
            return Err(LlmError::from_status(status, &error.message));
        }

        if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(LlmError::invalid_request(format!("Prompt blocked: {reason}")));
        }

        if let Some(usage) = chunk.usage_metadata {
            self.usage = Usage {
                input_tokens: u64::from(usage.prompt_token_count),
                output_tokens: u64::from(usage.candidates_token_count),
            };
        }

        if let Some(candidate) = chunk.candidates.into_iter().next() {
            let text: String = candidate
                .content
                .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
                .unwrap_or_default();
            if !text.is_empty() {
                self.queue.push_back(Ok(StreamChunk::Text(text)));
            }
            if candidate.finish_reason.is_some() {
                self.finish_reason = candidate.finish_reason;
            }
        }

        Ok(())
    }

    fn fail(&mut self, error: LlmError) {
        self.ended = true;
        self.queue.push_back(Err(error));
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
    prompt_feedback: Option<GeminiPromptFeedback>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
    code: Option<i64>,
}
