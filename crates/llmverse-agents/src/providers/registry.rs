use std::collections::BTreeMap;
use std::sync::Arc;

use llmverse_common::{Error, Result};
use llmverse_config::{AppConfig, ModelSettings, ProviderKind};
use tracing::info;

use super::{AnthropicProvider, LlmProvider, OllamaProvider, OpenAiCompatibleProvider};

/// What a configured provider can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// Accepts a system-role turn.
    pub system_role: bool,
    pub vision: bool,
    pub tools: bool,
    /// Takes image URLs as-is; otherwise images are fetched and inlined.
    pub image_urls: bool,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            system_role: true,
            vision: false,
            tools: false,
            image_urls: false,
        }
    }
}

#[derive(Clone)]
pub struct ProviderEntry {
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
    pub capabilities: ProviderCapabilities,
}

/// Name → provider lookup for every enabled model.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    entries: BTreeMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut registry = Self::new();
        for settings in config.enabled_models() {
            let provider = build_provider(settings)?;
            info!(
                "registered provider {} (model {})",
                settings.id(),
                settings.model()
            );
            registry.register(
                settings.id(),
                ProviderEntry {
                    provider,
                    model: settings.model().to_string(),
                    capabilities: ProviderCapabilities {
                        system_role: settings.has_system_support,
                        vision: settings.has_vision_support,
                        tools: settings.has_tool_support,
                        image_urls: matches!(
                            settings.name,
                            ProviderKind::OpenAi | ProviderKind::Azure
                        ),
                    },
                },
            );
        }
        Ok(registry)
    }

    pub fn register(&mut self, name: impl Into<String>, entry: ProviderEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&ProviderEntry> {
        self.entries.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Names rendered for chat, e.g. "`anthropic`, `openai`".
    pub fn available_models(&self) -> String {
        self.names()
            .map(|name| format!("`{name}`"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The registered provider named before the first colon of `input`.
    pub fn parse_model_name(&self, input: &str) -> Option<&str> {
        let (name, _) = input.split_once(':')?;
        self.entries.get_key_value(name).map(|(k, _)| k.as_str())
    }
}

fn build_provider(settings: &ModelSettings) -> Result<Arc<dyn LlmProvider>> {
    let api_key = settings.api_key.clone();
    let provider: Arc<dyn LlmProvider> = match settings.name {
        ProviderKind::Anthropic => Arc::new(
            AnthropicProvider::new(api_key).with_base_url(settings.base_url().to_string()),
        ),
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(Some(
            settings.base_url().to_string(),
        ))),
        ProviderKind::Azure => Arc::new(OpenAiCompatibleProvider::azure(
            api_key,
            settings.base_url(),
            settings.api_version.clone().unwrap_or_default(),
        )),
        ProviderKind::Bedrock => {
            return Err(Error::Config(format!(
                "{} is not supported",
                settings.id()
            )));
        }
        ProviderKind::OpenAi
        | ProviderKind::Google
        | ProviderKind::Mistral
        | ProviderKind::Groq
        | ProviderKind::Deepseek
        | ProviderKind::Qwen
        | ProviderKind::ChatGlm
        | ProviderKind::Lingyiwanwu => Arc::new(OpenAiCompatibleProvider::new(
            settings.id(),
            api_key,
            settings.base_url(),
        )),
    };
    Ok(provider)
}
