use std::sync::Arc;

use llmverse_agents::{ConversationPipeline, TurnInput};
use serenity::all::{Context, EventHandler, Message, Ready, ResumedEvent};
use tracing::{debug, info, warn};

use super::convert::{self, Inbound};
use super::surface::DiscordSurface;
use crate::delivery::{ChunkedDeliveryAdapter, DeliverySettings};
use crate::traits::DeliverySurface;

/// Serenity event handler that turns Discord messages into pipeline turns.
pub struct DiscordHandler {
    pipeline: Arc<ConversationPipeline>,
    delivery: DeliverySettings,
}

impl DiscordHandler {
    pub fn new(pipeline: Arc<ConversationPipeline>, delivery: DeliverySettings) -> Self {
        Self { pipeline, delivery }
    }

    async fn reply(&self, ctx: &Context, msg: &Message, text: &str) {
        if let Err(e) = msg.reply(ctx, text).await {
            warn!(channel = %msg.channel_id, "failed to reply: {e}");
        }
    }

    async fn answer(&self, ctx: &Context, msg: &Message, model: String, text: String) {
        let image_urls = convert::image_urls(
            msg.attachments
                .iter()
                .map(|a| (a.filename.as_str(), a.url.as_str())),
        );
        if !msg.attachments.is_empty() && image_urls.is_empty() {
            self.reply(ctx, msg, &convert::error_reply(&model, convert::NO_IMAGE_FOUND))
                .await;
            return;
        }

        let input = TurnInput {
            user: msg.author.id.to_string(),
            provider: model.clone(),
            text,
            image_urls,
        };
        let fragments = match self.pipeline.query(input) {
            Ok(fragments) => fragments,
            Err(e) => {
                self.reply(ctx, msg, &convert::error_reply(&model, &e.to_string()))
                    .await;
                return;
            }
        };

        let mut surface = DiscordSurface::new(ctx.http.clone(), msg.channel_id, msg.id);
        if let Err(e) = surface.typing().await {
            debug!("typing indicator failed: {e}");
        }

        let adapter = ChunkedDeliveryAdapter::new(self.delivery.clone()).with_headers(
            convert::window_header(&model),
            convert::continuation_header(&model),
        );
        match adapter.deliver(&mut surface, fragments).await {
            Ok(report) => debug!(
                windows = report.windows,
                chars = report.chars,
                "reply delivered"
            ),
            Err(e) => warn!(channel = %msg.channel_id, "reply delivery failed: {e}"),
        }
    }
}

#[serenity::async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(
            "Discord bot connected as {} (guilds: {})",
            ready.user.name,
            ready.guilds.len()
        );
    }

    async fn resume(&self, _ctx: Context, _: ResumedEvent) {
        info!("Discord gateway connection resumed");
    }

    async fn message(&self, ctx: Context, msg: Message) {
        // Ignore bots (including ourselves) and @everyone pings
        if msg.author.bot || msg.mention_everyone {
            return;
        }

        let bot_id = ctx.cache.current_user().id;
        let mentioned = msg.mentions.iter().any(|user| user.id == bot_id);
        if msg.guild_id.is_some() && !mentioned {
            return;
        }

        let content = convert::strip_markup(&msg.content);
        let referenced = msg.referenced_message.as_deref().map(|m| m.content.as_str());

        debug!(
            message_id = %msg.id,
            author = %msg.author.name,
            channel = %msg.channel_id,
            "received discord message"
        );

        match convert::parse_inbound(&content, referenced, self.pipeline.providers()) {
            Inbound::Ignore => {}
            Inbound::Clear => {
                let user = msg.author.id.to_string();
                match self.pipeline.clear_history(&user).await {
                    Ok(_) => self.reply(&ctx, &msg, convert::HISTORY_CLEARED).await,
                    Err(e) => warn!(%user, "failed to clear history: {e}"),
                }
            }
            Inbound::Models => {
                let text = convert::models_reply(self.pipeline.providers());
                self.reply(&ctx, &msg, &text).await;
            }
            Inbound::Prompt { model } => self.answer(&ctx, &msg, model, content).await,
        }
    }
}
