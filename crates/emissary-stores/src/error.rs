use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vector store API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Vector store unavailable: {0}")]
    Unavailable(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
