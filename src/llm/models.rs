//! Centralized model definitions
//!
//! Every model the server can talk to is listed here with the factory that
//! builds its service.

use super::{GeminiModel, GeminiService, LlmService};
use std::sync::Arc;

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID (e.g., "gemini-1.5-pro")
    pub id: &'static str,
    /// API name used by the provider (e.g., "gemini-1.5-pro-latest")
    pub api_name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Context window size in tokens
    pub context_window: usize,
    /// Factory function to create the service
    pub factory: fn(&str, Option<&str>) -> Result<Arc<dyn LlmService>, String>,
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "gemini-1.5-pro",
            api_name: "gemini-1.5-pro-latest",
            description: "Gemini 1.5 Pro (most capable)",
            context_window: 2_097_152,
            factory: |api_key, gateway| {
                // Accept any non-empty key (including "implicit" for gateway mode)
                if api_key.is_empty() {
                    return Err("gemini-1.5-pro requires GOOGLE_GENERATIVE_AI_API_KEY or gateway".to_string());
                }
                let service = GeminiService::new(api_key.to_string(), GeminiModel::Gemini15Pro, gateway)
                    .map_err(|e| e.to_string())?;
                Ok(Arc::new(service))
            },
        },
        ModelDef {
            id: "gemini-1.5-flash",
            api_name: "gemini-1.5-flash-latest",
            description: "Gemini 1.5 Flash (fast, efficient)",
            context_window: 1_048_576,
            factory: |api_key, gateway| {
                if api_key.is_empty() {
                    return Err("gemini-1.5-flash requires GOOGLE_GENERATIVE_AI_API_KEY or gateway".to_string());
                }
                let service = GeminiService::new(api_key.to_string(), GeminiModel::Gemini15Flash, gateway)
                    .map_err(|e| e.to_string())?;
                Ok(Arc::new(service))
            },
        },
    ]
}
