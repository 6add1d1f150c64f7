//! Scripted doubles shared by the orchestrator and pipeline tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use llmverse_common::{Error, Result, ToolCall};
use serde_json::Value;

use crate::providers::{
    GenerationEvent, GenerationStream, LlmProvider, LlmRequest, LlmResponse, tool_delta_chunk,
};
use crate::tools::{Tool, ToolContext};

type Round = Result<Vec<Result<GenerationEvent>>>;

/// Replays one scripted round per `generate` call and records requests.
pub(crate) struct ScriptedProvider {
    rounds: Mutex<VecDeque<Round>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn new(rounds: Vec<Round>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &LlmRequest) -> Result<GenerationStream> {
        self.requests.lock().unwrap().push(request.clone());
        let round = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Agent("no scripted round left".into())))?;
        Ok(stream::iter(round).boxed())
    }
}

pub(crate) fn chunk(text: &str) -> Result<GenerationEvent> {
    Ok(GenerationEvent::Chunk(Bytes::from(text.to_string())))
}

pub(crate) fn tool_chunk(id: &str, name: &str, arguments: &str) -> Result<GenerationEvent> {
    Ok(GenerationEvent::Chunk(tool_delta_chunk(id, name, arguments)))
}

pub(crate) fn done(text: &str) -> Result<GenerationEvent> {
    Ok(GenerationEvent::Completed(LlmResponse::text(text)))
}

pub(crate) fn done_with_calls(text: &str, calls: Vec<ToolCall>) -> Result<GenerationEvent> {
    Ok(GenerationEvent::Completed(LlmResponse {
        text: text.to_string(),
        tool_calls: calls,
        ..Default::default()
    }))
}

pub(crate) fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.into(),
    }
}

/// A tool that records its arguments and returns a fixed outcome.
pub(crate) struct RecordingTool {
    name: &'static str,
    outcome: std::result::Result<String, String>,
    calls: Mutex<Vec<Value>>,
}

impl RecordingTool {
    pub(crate) fn ok(name: &'static str, output: &str) -> Self {
        Self {
            name,
            outcome: Ok(output.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(name: &'static str, message: &str) -> Self {
        Self {
            name,
            outcome: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "test tool"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _context: &ToolContext, args: Value) -> Result<String> {
        self.calls.lock().unwrap().push(args);
        self.outcome.clone().map_err(Error::Tool)
    }
}
