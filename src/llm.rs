//! LLM provider abstraction
//!
//! Provides a common streaming interface over hosted completion models.

mod error;
mod gemini;
mod models;
mod registry;
mod types;


pub use error::{LlmError, LlmErrorKind};
pub use gemini::{GeminiModel, GeminiService};
pub use models::{all_models, ModelDef};
pub use registry::{LlmConfig, ModelInfo, ModelRegistry};
pub use types::*;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Stream of completion chunks. Terminates after one `StreamChunk::Done` or
/// one `Err`.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LlmError>> + Send>>;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Open a streaming completion. Errors before the first byte (bad status,
    /// connection failure) surface here; later ones arrive in the stream.
    async fn stream(&self, request: &LlmRequest) -> Result<CompletionStream, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;

    /// Get the context window size in tokens
    fn context_window(&self) -> usize;
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn stream(&self, request: &LlmRequest) -> Result<CompletionStream, LlmError> {
        let start = Instant::now();
        let model = self.model_id.clone();

        let stream = match self.inner.stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    model = %model,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM request failed"
                );
                return Err(e);
            }
        };

        tracing::debug!(
            model = %model,
            messages = request.messages.len(),
            first_byte_ms = %start.elapsed().as_millis(),
            "LLM stream opened"
        );

        Ok(Box::pin(stream.inspect(move |item| match item {
            Ok(StreamChunk::Done {
                finish_reason,
                usage,
            }) => {
                tracing::info!(
                    model = %model,
                    duration_ms = %start.elapsed().as_millis(),
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    total_tokens = usage.total(),
                    finish_reason = finish_reason.as_deref().unwrap_or("none"),
                    "LLM request completed"
                );
            }
            Ok(StreamChunk::Text(_)) => {}
            Err(e) => {
                tracing::error!(
                    model = %model,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM stream failed"
                );
            }
        })))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn context_window(&self) -> usize {
        self.inner.context_window()
    }
}
