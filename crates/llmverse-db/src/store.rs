use async_trait::async_trait;
use llmverse_common::{ConversationKey, ContentBlock, Result, Role, Turn};

/// Append-only, token-budgeted history of completed exchanges.
///
/// Implementations only ever hold Human/AI pairs; the system prompt is
/// rebuilt from configuration on every turn.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Ordered turns for `key`, oldest first. Unknown keys yield an empty
    /// history.
    async fn load(&self, key: &ConversationKey) -> Result<Vec<Turn>>;

    /// Append turns and trim the oldest completed pairs if the history
    /// exceeds the store's token budget.
    async fn append(&self, key: &ConversationKey, turns: &[Turn]) -> Result<()>;

    async fn clear(&self, key: &ConversationKey) -> Result<()>;

    /// Clear every conversation owned by `user`. Returns how many keys
    /// were removed.
    async fn clear_user(&self, user: &str) -> Result<usize>;
}

/// Rough token estimate: ~4 characters per token.
pub fn estimate_tokens(turns: &[Turn]) -> usize {
    let chars: usize = turns
        .iter()
        .flat_map(|turn| turn.parts.iter())
        .map(|part| match part {
            ContentBlock::Text { text } => text.chars().count(),
            ContentBlock::ToolCall(call) => call.arguments.len() + call.name.len(),
            ContentBlock::ToolResult(result) => result.content.chars().count(),
            ContentBlock::ImageUrl { .. } | ContentBlock::ImageData { .. } => 1000,
        })
        .sum();
    chars / 4
}

/// Drop the oldest Human/AI pairs until the history fits `max_tokens`.
/// The newest pair is always kept.
pub fn trim_to_budget(turns: &mut Vec<Turn>, max_tokens: usize) -> usize {
    let mut dropped = 0;
    while turns.len() > 2 && estimate_tokens(turns) > max_tokens {
        let pair = turns.len() >= 2 && turns[0].role == Role::Human && turns[1].role == Role::Ai;
        let n = if pair { 2 } else { 1 };
        turns.drain(..n);
        dropped += n;
    }
    dropped
}

/// Only text of Human and AI turns is persisted.
pub(crate) fn storable(turn: &Turn) -> Option<(Role, String)> {
    match turn.role {
        Role::Human | Role::Ai => Some((turn.role, turn.joined_text())),
        Role::System | Role::Tool => None,
    }
}
