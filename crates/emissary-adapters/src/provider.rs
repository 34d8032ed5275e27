//! Common adapter contract.
//!
//! Each provider keeps its native knobs — the request carries the superset
//! and adapters read what applies to them. Continuation state (response ids,
//! native histories) is owned by the adapters through the session cache.

use std::time::Duration;

use async_trait::async_trait;

use emissary_images::LoadedImage;

use crate::tools::ToolHandler;

/// Request handed to an adapter after context packing.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Fully assembled prompt (instructions + file map + inline files).
    pub prompt: String,
    /// Images for vision-capable models, attached to the user turn in each
    /// provider's native shape. Not persisted into session histories.
    pub images: Vec<LoadedImage>,
    /// Vector stores searchable from within this call.
    pub vector_store_ids: Vec<String>,
    pub temperature: Option<f64>,
    /// Responses-API reasoning effort (`low` / `medium` / `high`).
    pub reasoning_effort: Option<String>,
    /// Gemini thinking budget in tokens; `-1` means dynamic.
    pub thinking_budget: Option<i64>,
    /// Numeric deadline; enforcement lives in the operation manager, the
    /// adapter only uses it to choose dispatch mode and bound poll loops.
    pub timeout: Duration,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    pub content: String,
    /// Provider-issued continuation id, when the provider has one.
    pub response_id: Option<String>,
}

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    fn context_window(&self) -> usize;

    async fn generate(
        &self,
        req: &GenerateRequest,
        tools: &ToolHandler,
    ) -> Result<GenerateOutcome, AdapterError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("gateway idle timeout ({status}) on model {model}")]
    GatewayIdle { status: u16, model: String },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<emissary_sessions::SessionError> for AdapterError {
    fn from(e: emissary_sessions::SessionError) -> Self {
        AdapterError::Session(e.to_string())
    }
}

/// Promote gateway-idle statuses into their dedicated variant; the executor
/// turns that into a diagnostic pointing at dispatch configuration.
pub fn map_gateway_idle(err: AdapterError, model: &str) -> AdapterError {
    match err {
        AdapterError::Api { status, .. } if status == 504 || status == 524 => {
            AdapterError::GatewayIdle {
                status,
                model: model.to_string(),
            }
        }
        other => other,
    }
}
