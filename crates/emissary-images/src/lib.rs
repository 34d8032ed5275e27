pub mod format;
pub mod loader;

pub use loader::{load_images, ImageError, ImageLimits, ImageSource, LoadedImage};
