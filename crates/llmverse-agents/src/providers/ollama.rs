use async_trait::async_trait;
use futures::{StreamExt, stream};
use llmverse_common::{ContentBlock, Error, Result, Role, ToolCall, Turn};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    GenerationEvent, GenerationStream, LlmProvider, LlmRequest, LlmResponse, Usage,
    split_data_url,
};

/// Local Ollama server. Requests are sent with `stream: false`, so every
/// round-trip produces a single final response and no incremental chunks.
#[derive(Clone)]
pub struct OllamaProvider {
    base_url: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| "http://localhost:11434".to_string())
                .trim_end_matches('/')
                .to_string(),
            client: Client::new(),
        }
    }

    fn build_request_body(&self, request: &LlmRequest) -> Result<Value> {
        let messages = request
            .turns
            .iter()
            .map(convert_turn)
            .collect::<Result<Vec<_>>>()?;

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
        });

        let mut options = serde_json::Map::new();
        if let Some(temp) = request.temperature {
            options.insert("temperature".to_string(), json!(temp));
        }
        if let Some(max_tokens) = request.max_tokens {
            options.insert("num_predict".to_string(), json!(max_tokens));
        }
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }

        if !request.tools.is_empty() {
            body["tools"] = json!(
                request
                    .tools
                    .iter()
                    .map(|t| json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema
                        }
                    }))
                    .collect::<Vec<_>>()
            );
        }

        Ok(body)
    }
}

fn convert_turn(turn: &Turn) -> Result<Value> {
    let role = match turn.role {
        Role::System => "system",
        Role::Human => "user",
        Role::Ai => "assistant",
        Role::Tool => "tool",
    };

    if turn.role == Role::Tool {
        let result = turn
            .tool_result_part()
            .ok_or_else(|| Error::Agent("tool turn is missing its tool result".to_string()))?;
        return Ok(json!({ "role": role, "content": result.content }));
    }

    // Ollama only accepts raw base64 image payloads.
    let images: Vec<&str> = turn
        .parts
        .iter()
        .filter_map(|part| match part {
            ContentBlock::ImageData { data, .. } => Some(data.as_str()),
            ContentBlock::ImageUrl { url } => split_data_url(url).map(|(_, data)| data),
            _ => None,
        })
        .collect();

    let mut message = json!({ "role": role, "content": turn.joined_text() });
    if !images.is_empty() {
        message["images"] = json!(images);
    }

    let calls = turn
        .tool_calls()
        .map(|call| {
            let arguments: Value = serde_json::from_str(&call.arguments).map_err(|e| {
                Error::Agent(format!("invalid arguments for tool {}: {e}", call.name))
            })?;
            Ok(json!({ "function": { "name": call.name, "arguments": arguments } }))
        })
        .collect::<Result<Vec<_>>>()?;
    if !calls.is_empty() {
        message["tool_calls"] = json!(calls);
    }

    Ok(message)
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
    #[serde(default)]
    eval_count: u32,
    #[serde(default)]
    prompt_eval_count: u32,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Deserialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl From<OllamaResponse> for LlmResponse {
    fn from(response: OllamaResponse) -> Self {
        let (text, tool_calls) = match response.message {
            Some(message) => {
                let calls = message
                    .tool_calls
                    .into_iter()
                    .enumerate()
                    .map(|(i, call)| ToolCall {
                        id: format!("call_{i}"),
                        name: call.function.name,
                        arguments: if call.function.arguments.is_null() {
                            "{}".to_string()
                        } else {
                            call.function.arguments.to_string()
                        },
                    })
                    .collect();
                (message.content, calls)
            }
            None => (String::new(), Vec::new()),
        };

        LlmResponse {
            text,
            tool_calls,
            usage: Some(Usage {
                input_tokens: response.prompt_eval_count,
                output_tokens: response.eval_count,
            }),
            stop_reason: response
                .done_reason
                .or_else(|| response.done.then(|| "stop".to_string())),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn provider_id(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: &LlmRequest) -> Result<GenerationStream> {
        let body = self.build_request_body(request)?;
        let url = format!("{}/api/chat", self.base_url);

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("ollama request failed: {e}")))?;

        if !res.status().is_success() {
            return Err(Error::Agent(format!("ollama error status: {}", res.status())));
        }

        let ollama_res: OllamaResponse = res
            .json()
            .await
            .map_err(|e| Error::Agent(format!("failed to parse ollama response: {e}")))?;

        let event = GenerationEvent::Completed(ollama_res.into());
        Ok(stream::once(async move { Ok(event) }).boxed())
    }
}
