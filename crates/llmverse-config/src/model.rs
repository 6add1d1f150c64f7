use llmverse_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub discord_bot_token: String,

    #[serde(default)]
    pub enable_debug: bool,

    /// Token budget of the stored conversation per (user, provider).
    #[serde(default = "default_history_max_size")]
    pub history_max_size: usize,

    /// Maximum tokens a provider may generate for one answer.
    #[serde(default = "default_output_max_size")]
    pub output_max_size: u32,

    #[serde(default)]
    pub system_prompt: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default)]
    pub openweather_key: Option<String>,

    #[serde(default)]
    pub imgur_client_id: Option<String>,

    /// Deadline for one user turn, covering provider and tool calls.
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub models: Vec<ModelSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Google,
    Mistral,
    Groq,
    Bedrock,
    Azure,
    Deepseek,
    Qwen,
    ChatGlm,
    Lingyiwanwu,
    Anthropic,
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Google => "google",
            ProviderKind::Mistral => "mistral",
            ProviderKind::Groq => "groq",
            ProviderKind::Bedrock => "bedrock",
            ProviderKind::Azure => "azure",
            ProviderKind::Deepseek => "deepseek",
            ProviderKind::Qwen => "qwen",
            ProviderKind::ChatGlm => "chatglm",
            ProviderKind::Lingyiwanwu => "lingyiwanwu",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Ollama => "ollama",
        }
    }

    /// Default `(base_url, model)` for providers that have one.
    fn defaults(&self) -> (Option<&'static str>, &'static str) {
        match self {
            ProviderKind::OpenAi => (Some("https://api.openai.com/v1"), "gpt-4"),
            ProviderKind::Google => (
                Some("https://generativelanguage.googleapis.com/v1beta/openai"),
                "gemini-1.5-pro-latest",
            ),
            ProviderKind::Mistral => (Some("https://api.mistral.ai/v1"), "mistral-large-latest"),
            ProviderKind::Groq => (Some("https://api.groq.com/openai/v1"), "llama3-70b-8192"),
            ProviderKind::Bedrock => (None, "anthropic.claude-3-sonnet-20240229-v1:0"),
            ProviderKind::Azure => (None, "gpt-4"),
            ProviderKind::Deepseek => (Some("https://api.deepseek.com/v1"), "deepseek-chat"),
            ProviderKind::Qwen => (
                Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
                "qwen1.5-110b-chat",
            ),
            ProviderKind::ChatGlm => (Some("https://open.bigmodel.cn/api/paas/v4"), "glm-3-turbo"),
            ProviderKind::Lingyiwanwu => (Some("https://api.lingyiwanwu.com/v1"), "yi-large"),
            ProviderKind::Anthropic => (
                Some("https://api.anthropic.com/v1/messages"),
                "claude-3-5-sonnet-20240620",
            ),
            ProviderKind::Ollama => (Some("http://localhost:11434"), "llama3"),
        }
    }

    fn requires_api_key(&self) -> bool {
        !matches!(self, ProviderKind::Ollama | ProviderKind::Bedrock)
    }
}

/// Settings of one generation provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    pub name: ProviderKind,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub api_version: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub has_vision_support: bool,

    #[serde(default)]
    pub has_tool_support: bool,

    /// Some providers reject a system-role message.
    #[serde(default = "default_true")]
    pub has_system_support: bool,
}

impl ModelSettings {
    pub fn id(&self) -> &'static str {
        self.name.as_str()
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or_default()
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or_default()
    }

    /// Fill provider defaults and reject incomplete settings. Disabled
    /// entries are left untouched.
    pub fn validate(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let id = self.id();
        if self.name == ProviderKind::Bedrock {
            return Err(Error::Config(format!(
                "{id} is not supported; disable it or use another provider"
            )));
        }
        if self.name.requires_api_key() && self.api_key.trim().is_empty() {
            return Err(Error::Config(format!("{id} api_key is required")));
        }

        let (default_base_url, default_model) = self.name.defaults();
        if self.base_url.as_deref().is_none_or(|u| u.trim().is_empty()) {
            match default_base_url {
                Some(url) => self.base_url = Some(url.to_string()),
                None => return Err(Error::Config(format!("{id} base_url is required"))),
            }
        }
        let base_url = self.base_url();
        match url::Url::parse(base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(Error::Config(format!(
                    "{id} base_url is not an http(s) url: {base_url}"
                )));
            }
        }
        if self.model.as_deref().is_none_or(|m| m.trim().is_empty()) {
            self.model = Some(default_model.to_string());
        }
        if self.name == ProviderKind::Azure
            && self.api_version.as_deref().is_none_or(|v| v.is_empty())
        {
            self.api_version = Some("2024-02-01".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub backend: HistoryBackend,

    /// Database file for the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Limits of the chat surface replies are rendered to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    #[serde(default = "default_edit_interval_ms")]
    pub edit_interval_ms: u64,

    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
            edit_interval_ms: default_edit_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

impl AppConfig {
    /// Apply defaults that depend on other fields and validate every
    /// enabled model.
    pub fn validate(&mut self) -> Result<()> {
        if self.discord_bot_token.trim().is_empty() {
            return Err(Error::Config("discord_bot_token is required".into()));
        }
        if self.system_prompt.trim().is_empty() {
            self.system_prompt = DEFAULT_SYSTEM_PROMPT.to_string();
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::Config(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        if self.delivery.max_message_chars == 0 {
            return Err(Error::Config(
                "delivery.max_message_chars must be positive".into(),
            ));
        }
        if self.history.backend == HistoryBackend::Sqlite && self.history.path.is_none() {
            return Err(Error::Config(
                "history.path is required for the sqlite backend".into(),
            ));
        }

        let mut seen = Vec::new();
        for model in &mut self.models {
            model.validate()?;
            if model.enabled {
                if seen.contains(&model.name) {
                    return Err(Error::Config(format!(
                        "{} is enabled more than once",
                        model.id()
                    )));
                }
                seen.push(model.name);
            }
        }
        Ok(())
    }

    pub fn enabled_models(&self) -> impl Iterator<Item = &ModelSettings> {
        self.models.iter().filter(|m| m.enabled)
    }

    pub fn model(&self, name: &str) -> Option<&ModelSettings> {
        self.enabled_models().find(|m| m.id() == name)
    }

    pub fn vision_support(&self, name: &str) -> bool {
        self.model(name).is_some_and(|m| m.has_vision_support)
    }

    pub fn tool_support(&self, name: &str) -> bool {
        self.model(name).is_some_and(|m| m.has_tool_support)
    }

    pub fn openweather_key(&self) -> Option<&str> {
        self.openweather_key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn imgur_client_id(&self) -> Option<&str> {
        self.imgur_client_id.as_deref().filter(|k| !k.is_empty())
    }
}

fn default_history_max_size() -> usize {
    2048
}

fn default_output_max_size() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    0.7
}

fn default_turn_timeout_secs() -> u64 {
    60
}

fn default_max_message_chars() -> usize {
    2000
}

fn default_edit_interval_ms() -> u64 {
    1000
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}
