use std::sync::Arc;

use async_trait::async_trait;
use llmverse_common::{Error, Result};
use llmverse_config::AppConfig;
use tracing::info;

use crate::providers::ToolDefinition;

pub mod exchange_rate;
pub mod image;
pub mod weather;

pub use exchange_rate::ExchangeRateTool;
pub use image::{ImageGenerationTool, ImgurUploader};
pub use weather::WeatherTool;

/// Who a tool is running for.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user: String,
    pub provider: String,
}

/// A named capability a provider may invoke with JSON arguments.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object.
    fn input_schema(&self) -> serde_json::Value;

    /// Whether the tool may be advertised to `provider`.
    fn available_for(&self, _provider: &str) -> bool {
        true
    }

    async fn execute(&self, context: &ToolContext, args: serde_json::Value) -> Result<String>;
}

/// Name → tool lookup.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock tool set: exchange rates always, weather when an
    /// OpenWeather key is configured, image generation when the `openai`
    /// model is enabled.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ExchangeRateTool::new()));

        if let Some(key) = config.openweather_key() {
            registry.register(Arc::new(WeatherTool::new(key.to_string())));
        }

        if let Some(openai) = config.model("openai") {
            let mut tool = ImageGenerationTool::new(openai.api_key.clone(), openai.base_url());
            if let Some(client_id) = config.imgur_client_id() {
                tool = tool.with_imgur(ImgurUploader::new(client_id.to_string()));
            }
            registry.register(Arc::new(tool));
        }

        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!("registered tool: {}", tool.name());
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    /// Look up a tool that may run for `provider`.
    pub fn find(&self, name: &str, provider: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name && t.available_for(provider))
            .map(|t| t.as_ref())
    }

    pub fn definitions_for(&self, provider: &str) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|t| t.available_for(provider))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tools.iter().map(|t| t.name())
    }
}

/// Fetch a required string argument.
pub(crate) fn string_arg<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str> {
    args[key]
        .as_str()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Input(format!("missing or invalid '{key}' argument")))
}
