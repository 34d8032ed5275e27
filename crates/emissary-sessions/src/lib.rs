pub mod bridge;
pub mod cache;
pub mod compact;
pub mod convert;
pub mod error;
pub mod types;

pub use bridge::CliSessionBridge;
pub use cache::SessionCache;
pub use error::{Result, SessionError};
pub use types::{ChatMessage, Content, FunctionCall, FunctionRef, FunctionResponse, HistoryItem, MessagePart, Part, ToolCallMsg};
