use std::collections::HashMap;

use async_trait::async_trait;
use llmverse_common::{ConversationKey, Result, Turn};
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::{ConversationStore, storable, trim_to_budget};

/// Process-local history, lost on restart.
pub struct InMemoryConversationStore {
    max_tokens: usize,
    histories: Mutex<HashMap<ConversationKey, Vec<Turn>>>,
}

impl InMemoryConversationStore {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            histories: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, key: &ConversationKey) -> Result<Vec<Turn>> {
        let histories = self.histories.lock().await;
        Ok(histories.get(key).cloned().unwrap_or_default())
    }

    async fn append(&self, key: &ConversationKey, turns: &[Turn]) -> Result<()> {
        let mut histories = self.histories.lock().await;
        let history = histories.entry(key.clone()).or_default();
        history.extend(
            turns
                .iter()
                .filter_map(storable)
                .map(|(role, text)| Turn::text(role, text)),
        );

        let dropped = trim_to_budget(history, self.max_tokens);
        if dropped > 0 {
            debug!("trimmed {dropped} turn(s) from history {key}");
        }
        Ok(())
    }

    async fn clear(&self, key: &ConversationKey) -> Result<()> {
        self.histories.lock().await.remove(key);
        Ok(())
    }

    async fn clear_user(&self, user: &str) -> Result<usize> {
        let mut histories = self.histories.lock().await;
        let before = histories.len();
        histories.retain(|key, _| key.user != user);
        Ok(before - histories.len())
    }
}
