use llmverse_common::{Error, Result};
use llmverse_config::AppConfig;
use serenity::all::GatewayIntents;

/// Discord-specific settings extracted from the application config.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    /// Bot token for authenticating with Discord.
    pub bot_token: String,

    /// Gateway intents to request from Discord.
    pub intents: GatewayIntents,
}

impl DiscordConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self> {
        let bot_token = config.discord_bot_token.trim();
        if bot_token.is_empty() {
            return Err(Error::Config("discord_bot_token is required".into()));
        }

        // MESSAGE_CONTENT is privileged; without it guild messages arrive empty
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        Ok(Self {
            bot_token: bot_token.to_string(),
            intents,
        })
    }
}
