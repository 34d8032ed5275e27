use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache is closed")]
    Closed,

    #[error("session_id too long ({len} bytes, max 1024)")]
    SessionIdTooLong { len: usize },
}

pub type Result<T> = std::result::Result<T, CacheError>;
