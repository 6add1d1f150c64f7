use std::sync::Arc;

use async_trait::async_trait;
use llmverse_common::{Error, Result};
use serenity::all::{ChannelId, CreateMessage, EditMessage, Http, MessageId};

use crate::traits::DeliverySurface;

/// Reply windows posted as Discord replies to the triggering message.
pub struct DiscordSurface {
    http: Arc<Http>,
    channel: ChannelId,
    reply_to: MessageId,
}

impl DiscordSurface {
    pub fn new(http: Arc<Http>, channel: ChannelId, reply_to: MessageId) -> Self {
        Self {
            http,
            channel,
            reply_to,
        }
    }
}

#[async_trait]
impl DeliverySurface for DiscordSurface {
    type Handle = MessageId;

    async fn create(&mut self, text: &str) -> Result<MessageId> {
        let message = CreateMessage::new()
            .content(text)
            .reference_message((self.channel, self.reply_to));
        let sent = self
            .channel
            .send_message(&*self.http, message)
            .await
            .map_err(|e| Error::Channel(format!("failed to send discord reply: {e}")))?;
        Ok(sent.id)
    }

    async fn edit(&mut self, handle: &MessageId, text: &str) -> Result<()> {
        self.channel
            .edit_message(&*self.http, *handle, EditMessage::new().content(text))
            .await
            .map_err(|e| Error::Channel(format!("failed to edit discord reply: {e}")))?;
        Ok(())
    }

    async fn typing(&mut self) -> Result<()> {
        self.channel
            .broadcast_typing(&*self.http)
            .await
            .map_err(|e| Error::Channel(format!("failed to send typing indicator: {e}")))
    }
}
