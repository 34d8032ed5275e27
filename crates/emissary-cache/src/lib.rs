pub mod base;
pub mod error;
pub mod stable_list;

pub use base::SqliteCache;
pub use error::{CacheError, Result};
pub use stable_list::{SentFileInfo, StableListCache};
