use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use llmverse_common::{ContentBlock, Error, Result, Role, ToolCall, Turn};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::sse::{self, SseDecoder};
use super::{
    GenerationEvent, GenerationStream, LlmProvider, LlmRequest, LlmResponse, Usage,
    tool_delta_chunk,
};

/// Any backend speaking the OpenAI `/chat/completions` streaming dialect.
#[derive(Clone)]
pub struct OpenAiCompatibleProvider {
    id: String,
    client: Client,
    api_key: String,
    base_url: String,
    azure_api_version: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: impl Into<String>, api_key: String, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            client: Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            azure_api_version: None,
        }
    }

    /// Azure OpenAI: deployment-scoped URLs, `api-key` header and an
    /// `api-version` query parameter.
    pub fn azure(api_key: String, endpoint: impl Into<String>, api_version: String) -> Self {
        let mut provider = Self::new("azure", api_key, endpoint);
        provider.azure_api_version = Some(api_version);
        provider
    }

    fn endpoint(&self, model: &str) -> String {
        match &self.azure_api_version {
            Some(version) => format!(
                "{}/openai/deployments/{model}/chat/completions?api-version={version}",
                self.base_url
            ),
            None => format!("{}/chat/completions", self.base_url),
        }
    }

    fn convert_request(&self, request: &LlmRequest) -> Result<OpenAiRequest> {
        let messages = request
            .turns
            .iter()
            .map(convert_turn)
            .collect::<Result<Vec<_>>>()?;

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAiTool {
                        kind: "function".to_string(),
                        function: OpenAiFunctionDefinition {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.input_schema.clone(),
                        },
                    })
                    .collect(),
            )
        };

        Ok(OpenAiRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools,
            stream: true,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: &LlmRequest) -> Result<GenerationStream> {
        let url = self.endpoint(&request.model);
        let body = self.convert_request(request)?;

        let builder = self.client.post(&url).json(&body);
        let builder = if self.azure_api_version.is_some() {
            builder.header("api-key", &self.api_key)
        } else {
            builder.header("Authorization", format!("Bearer {}", self.api_key))
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Agent(format!("{} request failed: {e}", self.id)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "{} API error ({status}): {error_text}",
                self.id
            )));
        }

        Ok(sse::decode(
            response.bytes_stream().boxed(),
            ChatCompletionDecoder::default(),
        ))
    }
}

fn convert_turn(turn: &Turn) -> Result<OpenAiMessage> {
    match turn.role {
        Role::System => Ok(OpenAiMessage::System {
            content: turn.joined_text(),
        }),
        Role::Human => {
            if !turn.has_images() {
                return Ok(OpenAiMessage::User {
                    content: OpenAiUserContent::Text(turn.joined_text()),
                });
            }
            let parts = turn
                .parts
                .iter()
                .filter_map(|part| match part {
                    ContentBlock::Text { text } => {
                        Some(OpenAiContentPart::Text { text: text.clone() })
                    }
                    ContentBlock::ImageUrl { url } => Some(OpenAiContentPart::ImageUrl {
                        image_url: OpenAiImageUrl { url: url.clone() },
                    }),
                    ContentBlock::ImageData { media_type, data } => {
                        Some(OpenAiContentPart::ImageUrl {
                            image_url: OpenAiImageUrl {
                                url: format!("data:{media_type};base64,{data}"),
                            },
                        })
                    }
                    _ => None,
                })
                .collect();
            Ok(OpenAiMessage::User {
                content: OpenAiUserContent::Parts(parts),
            })
        }
        Role::Ai => {
            let text = turn.joined_text();
            let tool_calls: Vec<OpenAiToolCall> = turn
                .tool_calls()
                .map(|call| OpenAiToolCall {
                    id: call.id.clone(),
                    kind: "function".to_string(),
                    function: OpenAiFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect();
            Ok(OpenAiMessage::Assistant {
                content: (!text.is_empty()).then_some(text),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            })
        }
        Role::Tool => {
            let result = turn.tool_result_part().ok_or_else(|| {
                Error::Agent("tool turn is missing its tool result".to_string())
            })?;
            Ok(OpenAiMessage::Tool {
                tool_call_id: result.id.clone(),
                content: result.content.clone(),
            })
        }
    }
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates `chat.completion.chunk` payloads into the final response.
#[derive(Default)]
struct ChatCompletionDecoder {
    text: String,
    tool_calls: BTreeMap<u32, PartialToolCall>,
    usage: Option<Usage>,
    stop_reason: Option<String>,
}

impl SseDecoder for ChatCompletionDecoder {
    fn on_data(&mut self, data: &str, out: &mut VecDeque<GenerationEvent>) -> Result<()> {
        let chunk: OpenAiStreamChunk = serde_json::from_str(data)
            .map_err(|e| Error::Agent(format!("invalid stream chunk: {e}")))?;

        if let Some(error) = chunk.error {
            return Err(Error::Agent(format!("provider error: {}", error.message)));
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                self.text.push_str(&content);
                out.push_back(GenerationEvent::Chunk(Bytes::from(content)));
            }

            for (position, delta) in choice.delta.tool_calls.into_iter().flatten().enumerate() {
                let index = delta.index.unwrap_or(position as u32);
                let entry = self.tool_calls.entry(index).or_default();
                if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                    entry.id = id;
                }
                let (name, arguments) = match delta.function {
                    Some(f) => (f.name.unwrap_or_default(), f.arguments.unwrap_or_default()),
                    None => (String::new(), String::new()),
                };
                entry.name.push_str(&name);
                entry.arguments.push_str(&arguments);
                if name.is_empty() && arguments.is_empty() {
                    continue;
                }
                out.push_back(GenerationEvent::Chunk(tool_delta_chunk(
                    &entry.id, &name, &arguments,
                )));
            }

            if let Some(reason) = choice.finish_reason {
                self.stop_reason = Some(reason);
            }
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            });
        }
        Ok(())
    }

    fn finish(&mut self) -> LlmResponse {
        let tool_calls = std::mem::take(&mut self.tool_calls)
            .into_iter()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, call)| ToolCall {
                id: if call.id.is_empty() {
                    format!("call_{index}")
                } else {
                    call.id
                },
                name: call.name,
                arguments: call.arguments,
            })
            .collect();

        LlmResponse {
            text: std::mem::take(&mut self.text),
            tool_calls,
            usage: self.usage.take(),
            stop_reason: self.stop_reason.take(),
        }
    }
}

// Request types
#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    stream: bool,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum OpenAiMessage {
    System {
        content: String,
    },
    User {
        content: OpenAiUserContent,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAiToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Serialize)]
#[serde(untagged)]
enum OpenAiUserContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Serialize)]
struct OpenAiImageUrl {
    url: String,
}

#[derive(Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionCall,
}

#[derive(Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionDefinition,
}

#[derive(Serialize)]
struct OpenAiFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Stream types
#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
    error: Option<OpenAiError>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiStreamToolCall {
    index: Option<u32>,
    id: Option<String>,
    function: Option<OpenAiStreamFunctionCall>,
}

#[derive(Deserialize)]
struct OpenAiStreamFunctionCall {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAiError {
    message: String,
}
