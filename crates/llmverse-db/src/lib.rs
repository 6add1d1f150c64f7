pub mod memory_store;
pub mod session_store;
pub mod store;

pub use memory_store::InMemoryConversationStore;
pub use session_store::SqliteConversationStore;
pub use store::{ConversationStore, estimate_tokens, trim_to_budget};
