pub mod client;
pub mod error;
pub mod loiter;
pub mod manager;

pub use client::{SearchHit, VectorStoreClient};
pub use error::{Result, StoreError};
pub use loiter::LoiterKillerClient;
pub use manager::VectorStoreManager;
