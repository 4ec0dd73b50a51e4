//! Guide chat - streaming chat assistant for parents of children with
//! special needs
//!
//! Serves a single chat page backed by per-session actors that stream
//! Gemini completions into a versioned conversation.

mod api;
mod conversation;
mod llm;
mod runtime;
mod state_machine;
mod system_prompt;

use api::AppState;
use llm::{LlmConfig, ModelRegistry};
use runtime::{REAP_INTERVAL, SESSION_IDLE_TIMEOUT};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guide_chat=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let port: u16 = std::env::var("GUIDE_CHAT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    let bind: IpAddr = std::env::var("GUIDE_CHAT_BIND")
        .ok()
        .and_then(|b| b.parse().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    // Initialize LLM registry
    let llm_config = LlmConfig::from_env();
    let llm_registry = Arc::new(ModelRegistry::new(&llm_config));

    if llm_registry.has_models() {
        tracing::info!(
            models = ?llm_registry.available_models(),
            default = %llm_registry.default_model_id(),
            gateway = llm_config.gateway.is_some(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!(
            "No LLM credentials configured. Set GOOGLE_GENERATIVE_AI_API_KEY or LLM_GATEWAY."
        );
    }

    // Create application state
    let state = AppState::new(llm_registry);
    state
        .sessions
        .spawn_reaper(SESSION_IDLE_TIMEOUT, REAP_INTERVAL);

    // Start server
    let addr = SocketAddr::new(bind, port);
    tracing::info!("Guide chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    api::serve(listener, state, shutdown_signal()).await?;

    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
