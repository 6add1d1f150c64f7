use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use llmverse_common::{ContentBlock, Error, Result, Role, ToolCall, Turn};
use reqwest::Client;
use serde_json::{Value, json};

use super::sse::{self, SseDecoder};
use super::{
    GenerationEvent, GenerationStream, LlmProvider, LlmRequest, LlmResponse, Usage,
    split_data_url, tool_delta_chunk,
};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicProvider {
    api_key: String,
    client: Client,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn create_request_body(&self, request: &LlmRequest) -> Result<Value> {
        let system: Vec<String> = request
            .turns
            .iter()
            .filter(|t| t.role == Role::System)
            .map(Turn::joined_text)
            .collect();

        let mut messages: Vec<Value> = Vec::new();
        for turn in request.turns.iter().filter(|t| t.role != Role::System) {
            let role = match turn.role {
                Role::Ai => "assistant",
                // tool results travel in user messages
                _ => "user",
            };
            let blocks = convert_parts(turn)?;

            // Consecutive tool results must share one user message.
            if turn.role == Role::Tool {
                if let Some(batch) = messages.last_mut().and_then(tool_result_batch) {
                    batch.extend(blocks);
                    continue;
                }
            }
            messages.push(json!({ "role": role, "content": blocks }));
        }

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": true,
        });

        if !system.is_empty() {
            body["system"] = json!(system.join("\n"));
        }

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }

        if !request.tools.is_empty() {
            body["tools"] = json!(
                request
                    .tools
                    .iter()
                    .map(|t| json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema
                    }))
                    .collect::<Vec<_>>()
            );
        }

        Ok(body)
    }
}

fn tool_result_batch(message: &mut Value) -> Option<&mut Vec<Value>> {
    if message["role"] != "user" {
        return None;
    }
    let content = message["content"].as_array_mut()?;
    let all_results = content.iter().all(|b| b["type"] == "tool_result");
    all_results.then_some(content)
}

fn convert_parts(turn: &Turn) -> Result<Vec<Value>> {
    let mut blocks = Vec::new();
    for part in &turn.parts {
        match part {
            ContentBlock::Text { text } => {
                if !text.is_empty() {
                    blocks.push(json!({ "type": "text", "text": text }));
                }
            }
            ContentBlock::ImageUrl { url } => {
                let source = match split_data_url(url) {
                    Some((media_type, data)) => json!({
                        "type": "base64",
                        "media_type": media_type,
                        "data": data
                    }),
                    None => json!({ "type": "url", "url": url }),
                };
                blocks.push(json!({ "type": "image", "source": source }));
            }
            ContentBlock::ImageData { media_type, data } => {
                blocks.push(json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": media_type,
                        "data": data
                    }
                }));
            }
            ContentBlock::ToolCall(call) => {
                let input: Value = serde_json::from_str(&call.arguments).map_err(|e| {
                    Error::Agent(format!("invalid arguments for tool {}: {e}", call.name))
                })?;
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": input
                }));
            }
            ContentBlock::ToolResult(result) => {
                blocks.push(json!({
                    "type": "tool_result",
                    "tool_use_id": result.id,
                    "content": result.content
                }));
            }
        }
    }
    Ok(blocks)
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, request: &LlmRequest) -> Result<GenerationStream> {
        let body = self.create_request_body(request)?;

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("anthropic request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "anthropic API error ({status}): {error_text}"
            )));
        }

        Ok(sse::decode(
            response.bytes_stream().boxed(),
            MessagesDecoder::default(),
        ))
    }
}

#[derive(Default)]
struct PartialToolUse {
    id: String,
    name: String,
    input: String,
}

/// Accumulates Messages API stream events into the final response.
#[derive(Default)]
struct MessagesDecoder {
    text: String,
    tool_uses: BTreeMap<u64, PartialToolUse>,
    usage: Usage,
    stop_reason: Option<String>,
}

impl SseDecoder for MessagesDecoder {
    fn on_data(&mut self, data: &str, out: &mut VecDeque<GenerationEvent>) -> Result<()> {
        let event: Value = serde_json::from_str(data)
            .map_err(|e| Error::Agent(format!("invalid stream event: {e}")))?;

        match event["type"].as_str().unwrap_or_default() {
            "message_start" => {
                if let Some(tokens) = event["message"]["usage"]["input_tokens"].as_u64() {
                    self.usage.input_tokens = tokens as u32;
                }
            }
            "content_block_start" => {
                let index = event["index"].as_u64().unwrap_or(0);
                let block = &event["content_block"];
                match block["type"].as_str().unwrap_or_default() {
                    "text" => {
                        let text = block["text"].as_str().unwrap_or_default();
                        if !text.is_empty() {
                            self.text.push_str(text);
                            out.push_back(GenerationEvent::Chunk(Bytes::from(text.to_string())));
                        }
                    }
                    "tool_use" => {
                        let id = block["id"].as_str().unwrap_or_default().to_string();
                        let name = block["name"].as_str().unwrap_or_default().to_string();
                        out.push_back(GenerationEvent::Chunk(tool_delta_chunk(&id, &name, "")));
                        self.tool_uses.insert(
                            index,
                            PartialToolUse {
                                id,
                                name,
                                input: String::new(),
                            },
                        );
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let index = event["index"].as_u64().unwrap_or(0);
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or_default() {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or_default();
                        if !text.is_empty() {
                            self.text.push_str(text);
                            out.push_back(GenerationEvent::Chunk(Bytes::from(text.to_string())));
                        }
                    }
                    "input_json_delta" => {
                        let partial = delta["partial_json"].as_str().unwrap_or_default();
                        if let Some(tool) = self.tool_uses.get_mut(&index) {
                            tool.input.push_str(partial);
                            if !partial.is_empty() {
                                out.push_back(GenerationEvent::Chunk(tool_delta_chunk(
                                    &tool.id, "", partial,
                                )));
                            }
                        }
                    }
                    _ => {}
                }
            }
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Some(tokens) = event["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = tokens as u32;
                }
            }
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown error");
                return Err(Error::Agent(format!("anthropic stream error: {message}")));
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(&mut self) -> LlmResponse {
        let tool_calls = std::mem::take(&mut self.tool_uses)
            .into_values()
            .map(|tool| ToolCall {
                id: tool.id,
                name: tool.name,
                // a tool with no parameters streams no input at all
                arguments: if tool.input.is_empty() {
                    "{}".to_string()
                } else {
                    tool.input
                },
            })
            .collect();

        LlmResponse {
            text: std::mem::take(&mut self.text),
            tool_calls,
            usage: Some(self.usage),
            stop_reason: self.stop_reason.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmverse_common::ToolResult;

    fn request(turns: Vec<Turn>) -> LlmRequest {
        LlmRequest {
            model: "claude-3-5-sonnet-20240620".into(),
            turns,
            max_tokens: None,
            temperature: Some(0.7),
            tools: vec![],
        }
    }

    #[test]
    fn system_turns_move_to_the_system_field() {
        let provider = AnthropicProvider::new("key".into());
        let body = provider
            .create_request_body(&request(vec![Turn::system("be brief"), Turn::human("hi")]))
            .unwrap();

        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn consecutive_tool_results_share_a_user_message() {
        let call = |id: &str| ToolCall {
            id: id.into(),
            name: "getExchangeRate".into(),
            arguments: "{\"currency_date\":\"latest\"}".into(),
        };
        let result = |id: &str| {
            Turn::tool_result(ToolResult {
                id: id.into(),
                name: "getExchangeRate".into(),
                content: "{}".into(),
            })
        };
        let ai = Turn {
            role: Role::Ai,
            parts: vec![
                ContentBlock::ToolCall(call("a")),
                ContentBlock::ToolCall(call("b")),
            ],
        };

        let provider = AnthropicProvider::new("key".into());
        let body = provider
            .create_request_body(&request(vec![
                Turn::human("rates?"),
                ai,
                result("a"),
                result("b"),
            ]))
            .unwrap();

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][0]["type"], "tool_use");
        assert_eq!(messages[1]["content"][0]["input"]["currency_date"], "latest");
        assert_eq!(messages[2]["content"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn decoder_re_emits_tool_use_as_deltas() {
        let mut decoder = MessagesDecoder::default();
        let mut out = VecDeque::new();
        for data in [
            r#"{"type":"message_start","message":{"usage":{"input_tokens":12}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"getWeather","input":{}}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"location\":"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"\"Paris,FR\"}"}}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":9}}"#,
        ] {
            decoder.on_data(data, &mut out).unwrap();
        }

        assert_eq!(out.len(), 3);
        let response = decoder.finish();
        assert_eq!(response.tool_calls[0].name, "getWeather");
        assert_eq!(response.tool_calls[0].arguments, "{\"location\":\"Paris,FR\"}");
        assert_eq!(
            response.usage,
            Some(Usage {
                input_tokens: 12,
                output_tokens: 9
            })
        );
    }
}
