pub mod attachments;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod tools;
pub mod transcoder;

#[cfg(test)]
mod testing;

pub use attachments::{HttpImageFetcher, ImageFetcher};
pub use orchestrator::{ToolCallOrchestrator, ToolOutcome};
pub use pipeline::{
    ConversationPipeline, FragmentSink, PipelineSettings, TurnInput, TurnOutcome, TurnState,
};
pub use providers::{
    AnthropicProvider, GenerationEvent, GenerationStream, LlmProvider, LlmRequest, LlmResponse,
    OllamaProvider, OpenAiCompatibleProvider, ProviderCapabilities, ProviderEntry,
    ProviderRegistry, ToolDefinition, Usage,
};
pub use tools::{Tool, ToolContext, ToolRegistry};
pub use transcoder::{StreamFragment, transcode};
