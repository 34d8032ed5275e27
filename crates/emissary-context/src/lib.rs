pub mod error;
pub mod packer;
pub mod prompt;
pub mod walker;

pub use error::{PackError, Result};
pub use packer::{ContextPacker, PackRequest, PackedContext};
