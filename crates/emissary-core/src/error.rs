use thiserror::Error;

/// Error taxonomy surfaced to MCP callers.
///
/// Every component error is mapped into one of these before it reaches the
/// transport. `Cancelled` is special: the transport reports it as an empty
/// content block, never as a tool error.
#[derive(Debug, Error)]
pub enum EmissaryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Context budget exceeded: priority files need ~{needed} tokens, budget is {budget}")]
    BudgetExceeded { needed: usize, budget: usize },

    #[error("Vector store unavailable: {0}")]
    VectorStoreUnavailable(String),

    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error(
        "Gateway timeout ({status}) after idle time on model {model}. Non-streaming \
         requests that take too long to produce output hit the gateway idle limit; \
         background mode should have been selected for this request — this indicates \
         an adapter dispatch configuration problem."
    )]
    GatewayIdle { status: u16, model: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EmissaryError {
    /// Short error code string included in MCP tool error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            EmissaryError::Config(_) => "CONFIG_ERROR",
            EmissaryError::Validation(_) => "VALIDATION_ERROR",
            EmissaryError::BudgetExceeded { .. } => "BUDGET_EXCEEDED",
            EmissaryError::VectorStoreUnavailable(_) => "VECTOR_STORE_UNAVAILABLE",
            EmissaryError::Timeout { .. } => "TIMEOUT",
            EmissaryError::Provider(_) => "PROVIDER_ERROR",
            EmissaryError::GatewayIdle { .. } => "GATEWAY_IDLE",
            EmissaryError::Cancelled => "CANCELLED",
            EmissaryError::Database(_) => "DATABASE_ERROR",
            EmissaryError::Serialization(_) => "SERIALIZATION_ERROR",
            EmissaryError::Io(_) => "IO_ERROR",
            EmissaryError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, EmissaryError>;
