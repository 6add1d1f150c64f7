use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one conversation: a user talking to one provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey {
    pub user: String,
    pub provider: String,
}

impl ConversationKey {
    pub fn new(user: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            provider: provider.into(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.user, self.provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_user_and_provider() {
        let key = ConversationKey::new("alice", "openai");
        assert_eq!(key.to_string(), "alice_openai");
    }

    #[test]
    fn keys_with_same_parts_are_equal() {
        assert_eq!(
            ConversationKey::new("bob", "groq"),
            ConversationKey::new("bob".to_string(), "groq".to_string())
        );
        assert_ne!(
            ConversationKey::new("bob", "groq"),
            ConversationKey::new("bob", "qwen")
        );
    }
}
