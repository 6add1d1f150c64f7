use std::sync::Arc;

use futures::StreamExt;
use llmverse_common::{Error, Result, ToolResult, Turn};
use tracing::{info, warn};

use crate::pipeline::FragmentSink;
use crate::providers::{GenerationEvent, LlmProvider, LlmRequest, LlmResponse};
use crate::tools::{ToolContext, ToolRegistry};
use crate::transcoder::transcode;

/// Result of one tool-enabled round-trip.
#[derive(Debug)]
pub struct ToolOutcome {
    /// The request turns plus the AI turn and any tool results.
    pub content: Vec<Turn>,
    /// The provider answered without requesting tools; its text is final.
    pub return_direct: bool,
    /// At least one chunk was streamed during the round-trip.
    pub streamed: bool,
}

/// Runs the tool phase of a turn: one provider call with tools advertised,
/// then every requested tool in order.
pub struct ToolCallOrchestrator {
    tools: Arc<ToolRegistry>,
}

impl ToolCallOrchestrator {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }

    /// Unknown tools are skipped. Malformed arguments or a failing tool
    /// abort the turn.
    pub async fn execute(
        &self,
        provider: &dyn LlmProvider,
        request: &LlmRequest,
        context: &ToolContext,
        sink: &FragmentSink,
    ) -> Result<ToolOutcome> {
        let (response, streamed) = self.round_trip(provider, request, sink).await?;
        let mut content = request.turns.clone();

        if response.tool_calls.is_empty() {
            content.push(response.to_turn([]));
            return Ok(ToolOutcome {
                content,
                return_direct: true,
                streamed,
            });
        }

        let mut dispatched = Vec::new();
        let mut results = Vec::new();
        for call in &response.tool_calls {
            let Some(tool) = self.tools.find(&call.name, &context.provider) else {
                warn!(tool = %call.name, provider = %context.provider, "unknown tool call, skipping");
                continue;
            };

            let args: serde_json::Value = serde_json::from_str(&call.arguments).map_err(|e| {
                Error::Input(format!("invalid arguments for tool {}: {e}", call.name))
            })?;

            info!(tool = %call.name, user = %context.user, "running tool");
            let output = tool.execute(context, args).await?;

            dispatched.push(call);
            results.push(Turn::tool_result(ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                content: output,
            }));
        }

        content.push(response.to_turn(dispatched));
        content.extend(results);

        if streamed {
            sink.send(transcode(&[], true).to_string()).await?;
        }

        Ok(ToolOutcome {
            content,
            return_direct: false,
            streamed,
        })
    }

    async fn round_trip(
        &self,
        provider: &dyn LlmProvider,
        request: &LlmRequest,
        sink: &FragmentSink,
    ) -> Result<(LlmResponse, bool)> {
        let mut stream = provider.generate(request).await?;
        let mut streamed = false;

        while let Some(event) = stream.next().await {
            match event? {
                GenerationEvent::Chunk(bytes) => {
                    streamed = true;
                    sink.send(transcode(&bytes, false).to_string()).await?;
                }
                GenerationEvent::Completed(response) => return Ok((response, streamed)),
            }
        }

        Err(Error::Agent(
            "provider stream ended without a response".to_string(),
        ))
    }
}
