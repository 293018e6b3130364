use pmm_domain::error::Result;
use pmm_domain::message::{Message, ResponseContent, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An engine-agnostic completion response.
///
/// `content` is the raw content shape as the engine produced it; text
/// extraction and tool-request extraction go through the normalizer.
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub content: ResponseContent,
    /// The model that actually produced the response.
    pub model: String,
    /// The reason the engine stopped generating (e.g. "stop", "tool_calls").
    pub stop_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core engine trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every completion engine adapter must implement.
///
/// Deliberately non-streaming: the orchestrator generates the full
/// response first and streams fragments to the caller afterwards, so
/// tool requests can be inspected before anything reaches the client.
#[async_trait::async_trait]
pub trait CompletionEngine: Send + Sync {
    /// Send the conversation and tool schema, wait for the full response.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<EngineResponse>;

    /// A unique identifier for this engine instance.
    fn engine_id(&self) -> &str;
}
