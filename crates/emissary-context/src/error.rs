use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("priority context needs ~{needed} tokens, inline budget is {budget}")]
    BudgetExceeded { needed: usize, budget: usize },

    #[error(transparent)]
    Cache(#[from] emissary_cache::CacheError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PackError>;
