mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use llmverse_agents::{ConversationPipeline, PipelineSettings, ProviderRegistry, ToolRegistry};
use llmverse_channels::{DeliverySettings, DiscordChannel, DiscordConfig};
use llmverse_config::{AppConfig, ConfigLoader, HistoryBackend};
use llmverse_db::{ConversationStore, InMemoryConversationStore, SqliteConversationStore};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "llmverse", version, about = "Chat with many LLM providers from Discord")]
struct Cli {
    /// Settings file (JSON, YAML or TOML)
    #[arg(long, global = true, env = "LLMVERSE_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Environment file loaded before the settings
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to Discord and serve until interrupted (default)
    Start,
    /// Load and validate the settings, then print the enabled models
    CheckConfig,
    /// Print the enabled model names
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = logging::init(cli.debug, cli.log_json);

    let config = ConfigLoader::new(cli.config.clone())
        .with_env_file(cli.env_file.clone())
        .load()
        .with_context(|| format!("failed to load settings from {}", cli.config.display()))?;
    if config.enable_debug {
        log_level.enable_debug();
    }

    match cli.command.unwrap_or(Command::Start) {
        Command::Start => start(config).await,
        Command::CheckConfig => check_config(&config),
        Command::Models => {
            let providers = ProviderRegistry::from_config(&config)?;
            for name in providers.names() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

async fn start(config: AppConfig) -> Result<()> {
    let providers = ProviderRegistry::from_config(&config)?;
    if providers.is_empty() {
        bail!("no models are enabled in the settings");
    }
    info!("available models: {}", providers.available_models());

    let tools = ToolRegistry::from_config(&config);
    let store = open_store(&config)?;
    let pipeline = Arc::new(ConversationPipeline::new(
        Arc::new(providers),
        Arc::new(tools),
        store,
        PipelineSettings::from_config(&config),
    ));

    let discord = DiscordChannel::new(
        DiscordConfig::from_app_config(&config)?,
        pipeline,
        DeliverySettings::from_config(&config),
    );
    discord.run_until(shutdown_signal()).await?;

    info!("llmverse stopped");
    Ok(())
}

fn open_store(config: &AppConfig) -> Result<Arc<dyn ConversationStore>> {
    let store: Arc<dyn ConversationStore> = match config.history.backend {
        HistoryBackend::Memory => Arc::new(InMemoryConversationStore::new(config.history_max_size)),
        HistoryBackend::Sqlite => {
            let path = config
                .history
                .path
                .as_deref()
                .context("history.path is required for the sqlite backend")?;
            Arc::new(SqliteConversationStore::open(path, config.history_max_size)?)
        }
    };
    Ok(store)
}

fn check_config(config: &AppConfig) -> Result<()> {
    let providers = ProviderRegistry::from_config(config)?;
    println!("settings ok");
    println!("history: {:?}, budget {} tokens", config.history.backend, config.history_max_size);
    for name in providers.names() {
        if let Some(entry) = providers.get(name) {
            let caps = &entry.capabilities;
            println!(
                "  {name}: model={} system={} vision={} tools={}",
                entry.model, caps.system_role, caps.vision, caps.tools
            );
        }
    }
    let tools = ToolRegistry::from_config(config);
    println!("tools: {}", tools.names().collect::<Vec<_>>().join(", "));
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl-C, shutting down"),
        Err(e) => {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    }
}
