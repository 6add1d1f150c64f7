//! Discord channel: a serenity gateway client that answers mentions and
//! direct messages with streamed, paced replies.

mod config;
pub mod convert;
mod handler;
mod surface;

pub use config::DiscordConfig;
pub use handler::DiscordHandler;
pub use surface::DiscordSurface;

use std::future::Future;
use std::sync::Arc;

use llmverse_agents::ConversationPipeline;
use llmverse_common::{Error, Result};
use serenity::Client;
use tracing::info;

use crate::delivery::DeliverySettings;

pub struct DiscordChannel {
    config: DiscordConfig,
    pipeline: Arc<ConversationPipeline>,
    delivery: DeliverySettings,
}

impl DiscordChannel {
    pub fn new(
        config: DiscordConfig,
        pipeline: Arc<ConversationPipeline>,
        delivery: DeliverySettings,
    ) -> Self {
        Self {
            config,
            pipeline,
            delivery,
        }
    }

    /// Connect to the gateway and serve messages until `shutdown` resolves
    /// or the connection fails.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let handler = DiscordHandler::new(self.pipeline, self.delivery);
        let mut client = Client::builder(&self.config.bot_token, self.config.intents)
            .event_handler(handler)
            .await
            .map_err(|e| Error::Channel(format!("failed to build discord client: {e}")))?;
        let shards = client.shard_manager.clone();

        info!("connecting to discord gateway");
        tokio::select! {
            result = client.start() => {
                result.map_err(|e| Error::Channel(format!("discord gateway error: {e}")))
            }
            _ = shutdown => {
                info!("disconnecting from discord");
                shards.shutdown_all().await;
                Ok(())
            }
        }
    }
}
