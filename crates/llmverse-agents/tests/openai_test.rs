use futures::StreamExt;
use llmverse_agents::{
    GenerationEvent, LlmProvider, LlmRequest, LlmResponse, OpenAiCompatibleProvider,
    StreamFragment, ToolDefinition, transcode,
};
use llmverse_common::Turn;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(events: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str(&format!("data: {event}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn request(tools: Vec<ToolDefinition>) -> LlmRequest {
    LlmRequest {
        model: "gpt-4".to_string(),
        turns: vec![Turn::system("You are a helpful assistant."), Turn::human("Hello")],
        max_tokens: Some(4096),
        temperature: Some(0.7),
        tools,
    }
}

async fn drain(provider: &OpenAiCompatibleProvider, request: &LlmRequest) -> (Vec<String>, LlmResponse) {
    let mut stream = provider.generate(request).await.expect("generate");
    let mut chunks = Vec::new();
    let mut completed = None;
    while let Some(event) = stream.next().await {
        match event.expect("stream event") {
            GenerationEvent::Chunk(bytes) => chunks.push(String::from_utf8_lossy(&bytes).into_owned()),
            GenerationEvent::Completed(response) => completed = Some(response),
        }
    }
    (chunks, completed.expect("completed event"))
}

#[tokio::test]
async fn test_openai_streamed_text() {
    let mock_server = MockServer::start().await;

    let body = sse(&[
        json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}}]}),
        json!({"choices": [{"index": 0, "delta": {"content": "Hello"}}]}),
        json!({"choices": [{"index": 0, "delta": {"content": " there!"}, "finish_reason": "stop"}]}),
        json!({"choices": [], "usage": {"prompt_tokens": 9, "completion_tokens": 3}}),
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "gpt-4", "stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&mock_server)
        .await;

    let provider = OpenAiCompatibleProvider::new("openai", "test-key".to_string(), mock_server.uri());
    let (chunks, response) = drain(&provider, &request(vec![])).await;

    assert_eq!(chunks, ["Hello", " there!"]);
    assert_eq!(response.text, "Hello there!");
    assert!(response.tool_calls.is_empty());
    assert_eq!(response.stop_reason.as_deref(), Some("stop"));
    assert_eq!(response.usage.map(|u| u.output_tokens), Some(3));
}

#[tokio::test]
async fn test_openai_streamed_tool_calls() {
    let mock_server = MockServer::start().await;

    let body = sse(&[
        json!({"choices": [{"index": 0, "delta": {"tool_calls": [
            {"index": 0, "id": "call_abc", "type": "function", "function": {"name": "getWeather", "arguments": ""}}
        ]}}]}),
        json!({"choices": [{"index": 0, "delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "{\"location\":"}}
        ]}}]}),
        json!({"choices": [{"index": 0, "delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "\"Boston,US\"}"}}
        ]}, "finish_reason": "tool_calls"}]}),
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"tools": [{"type": "function", "function": {"name": "getWeather"}}]})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&mock_server)
        .await;

    let provider = OpenAiCompatibleProvider::new("openai", "test-key".to_string(), mock_server.uri());
    let tools = vec![ToolDefinition {
        name: "getWeather".to_string(),
        description: "Get the weather".to_string(),
        input_schema: json!({"type": "object", "properties": {"location": {"type": "string"}}}),
    }];
    let (chunks, response) = drain(&provider, &request(tools)).await;

    let fragments: Vec<StreamFragment> = chunks.iter().map(|c| transcode(c.as_bytes(), false)).collect();
    assert_eq!(
        fragments[0].to_string(),
        "||*** Running tool: [getWeather] with arguments: *** `"
    );
    assert_eq!(fragments[1].to_string(), "{\"location\":");
    assert_eq!(fragments[2].to_string(), "\"Boston,US\"}");

    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(response.tool_calls[0].id, "call_abc");
    assert_eq!(response.tool_calls[0].name, "getWeather");
    assert_eq!(response.tool_calls[0].arguments, "{\"location\":\"Boston,US\"}");
}

#[tokio::test]
async fn test_azure_deployment_url_and_key_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/openai/deployments/gpt-4/chat/completions"))
        .and(query_param("api-version", "2024-02-01"))
        .and(header("api-key", "azure-key"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse(&[json!({"choices": [{"index": 0, "delta": {"content": "hi"}}]})]),
            "text/event-stream",
        ))
        .mount(&mock_server)
        .await;

    let provider = OpenAiCompatibleProvider::azure(
        "azure-key".to_string(),
        mock_server.uri(),
        "2024-02-01".to_string(),
    );
    let (chunks, _) = drain(&provider, &request(vec![])).await;
    assert_eq!(chunks, ["hi"]);
}

#[tokio::test]
async fn test_openai_error_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&mock_server)
        .await;

    let provider = OpenAiCompatibleProvider::new("groq", "bad".to_string(), mock_server.uri());
    let err = provider
        .generate(&request(vec![]))
        .await
        .err()
        .expect("should fail");
    let message = err.to_string();
    assert!(message.contains("groq API error"), "{message}");
    assert!(message.contains("invalid api key"), "{message}");
}
