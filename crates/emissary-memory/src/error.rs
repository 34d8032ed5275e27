use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Store(#[from] emissary_stores::StoreError),

    #[error("Memory search timed out after {secs}s")]
    SearchTimeout { secs: u64 },

    #[error("{0}")]
    InvalidQuery(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
