//! Completion engine adapters.
//!
//! The orchestrator talks to [`CompletionEngine`]; adapters translate
//! between the internal message types and each engine's wire format.

mod anthropic;
mod scripted;
mod traits;

pub use anthropic::AnthropicEngine;
pub use scripted::ScriptedEngine;
pub use traits::{CompletionEngine, EngineResponse};
