//! Scripted in-memory engine for tests.
//!
//! Responses are queued up front and popped in order, so a test can
//! drive a multi-call turn (first response requests tools, second is
//! the follow-up) without any network.

use std::collections::VecDeque;

use parking_lot::Mutex;

use pmm_domain::error::{Error, Result};
use pmm_domain::message::{ContentPart, Message, ResponseContent, ToolDefinition};

use crate::traits::{CompletionEngine, EngineResponse};

/// A deterministic engine that replays a scripted response queue.
#[derive(Default)]
pub struct ScriptedEngine {
    responses: Mutex<VecDeque<Result<EngineResponse>>>,
    /// Number of `complete` calls observed (for assertions).
    calls: Mutex<usize>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain-text response.
    pub fn push_text(&self, text: impl Into<String>) {
        self.responses.lock().push_back(Ok(EngineResponse {
            content: ResponseContent::PlainText(text.into()),
            model: "scripted".into(),
            stop_reason: Some("stop".into()),
        }));
    }

    /// Queue a block response (text plus tool requests).
    pub fn push_blocks(&self, blocks: Vec<ContentPart>) {
        let has_tools = blocks
            .iter()
            .any(|b| matches!(b, ContentPart::ToolUse { .. }));
        self.responses.lock().push_back(Ok(EngineResponse {
            content: ResponseContent::Blocks(blocks),
            model: "scripted".into(),
            stop_reason: Some(if has_tools { "tool_calls" } else { "stop" }.into()),
        }));
    }

    /// Queue an engine failure.
    pub fn push_error(&self, message: impl Into<String>) {
        self.responses.lock().push_back(Err(Error::Engine {
            engine: "scripted".into(),
            message: message.into(),
        }));
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait::async_trait]
impl CompletionEngine for ScriptedEngine {
    async fn complete(
        &self,
        _messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<EngineResponse> {
        *self.calls.lock() += 1;
        self.responses.lock().pop_front().unwrap_or_else(|| {
            Err(Error::Engine {
                engine: "scripted".into(),
                message: "script exhausted".into(),
            })
        })
    }

    fn engine_id(&self) -> &str {
        "scripted"
    }
}
