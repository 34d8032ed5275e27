pub mod blocking;
pub mod config;
pub mod error;
pub mod redaction;
pub mod scope;

pub use error::{EmissaryError, Result};
