//! HTTP API for the guide chat

mod assets;
mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::llm::ModelRegistry;
use crate::runtime::{LlmClient, RegistryLlmClient, SessionManager};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub llm_registry: Arc<ModelRegistry>,
}

impl AppState {
    pub fn new(llm_registry: Arc<ModelRegistry>) -> Self {
        let llm_client = RegistryLlmClient::new(
            llm_registry.clone(),
            llm_registry.default_model_id().to_string(),
        );
        Self::with_llm_client(llm_registry, Arc::new(llm_client))
    }

    /// State whose sessions use the given client instead of the registry
    pub fn with_llm_client(llm_registry: Arc<ModelRegistry>, llm_client: Arc<dyn LlmClient>) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new(llm_client)),
            llm_registry,
        }
    }
}

/// Serve the app until `signal` resolves.
///
/// Sessions are shut down as part of the signal, so open event streams end
/// and graceful shutdown does not wait on them.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    signal: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let sessions = state.sessions.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            sessions.shutdown().await;
        })
        .await
}
