use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use llmverse_common::{ContentBlock, Result, Role, ToolCall, Turn};
use serde::{Deserialize, Serialize};

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod registry;
mod sse;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiCompatibleProvider;
pub use registry::{ProviderCapabilities, ProviderEntry, ProviderRegistry};

/// Trait for generation provider integrations (OpenAI-compatible, Anthropic, Ollama).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g. "openai", "anthropic", "ollama").
    fn provider_id(&self) -> &str;

    /// Start one round-trip.
    ///
    /// The returned stream yields zero or more [`GenerationEvent::Chunk`]
    /// events followed by exactly one [`GenerationEvent::Completed`].
    /// Providers that cannot stream yield only the final event.
    async fn generate(&self, request: &LlmRequest) -> Result<GenerationStream>;
}

pub type GenerationStream = BoxStream<'static, Result<GenerationEvent>>;

#[derive(Debug, Clone)]
pub enum GenerationEvent {
    /// Raw incremental output: plain text, or a JSON-encoded tool-call delta
    /// (`[{"id","type","function":{"name","arguments"}}]`).
    Chunk(Bytes),
    Completed(LlmResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub turns: Vec<Turn>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub stop_reason: Option<String>,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// The AI turn for this response, carrying only the given tool calls.
    pub fn to_turn<'a>(&self, calls: impl IntoIterator<Item = &'a ToolCall>) -> Turn {
        let mut parts = Vec::new();
        if !self.text.is_empty() {
            parts.push(ContentBlock::Text {
                text: self.text.clone(),
            });
        }
        parts.extend(calls.into_iter().cloned().map(ContentBlock::ToolCall));
        Turn {
            role: Role::Ai,
            parts,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Encode one tool-call delta in the chunk format the transcoder recognises.
pub(crate) fn tool_delta_chunk(id: &str, name: &str, arguments: &str) -> Bytes {
    let value = serde_json::json!([{
        "id": id,
        "type": "function",
        "function": { "name": name, "arguments": arguments },
    }]);
    Bytes::from(value.to_string())
}

/// Split a `data:` URL into `(media_type, base64_data)`.
pub(crate) fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let media_type = meta.strip_suffix(";base64")?;
    Some((media_type, data))
}
