use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Cache(#[from] emissary_cache::CacheError),

    #[error("corrupt session payload: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
