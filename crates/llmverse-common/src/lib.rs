pub mod error;
pub mod message;
pub mod types;

pub use error::{Error, Result};
pub use message::{ContentBlock, Role, ToolCall, ToolResult, Turn};
pub use types::ConversationKey;
