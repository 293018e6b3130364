//! Tool registry and executor.
//!
//! Tools are registered once at startup and shared read-only across
//! all sessions. The executor enforces the failure boundary: whatever
//! happens inside a tool (unknown name, invocation error, timeout),
//! the turn receives an error-bearing outcome, never an abort.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;

use pmm_domain::error::Result;
use pmm_domain::message::{ToolCall, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A callable capability the engine can request.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments.
    fn parameters(&self) -> Value;

    /// Argument field to fill from the most recent user text when the
    /// engine supplies empty arguments. `None` (the default) disables
    /// the recovery; such tools fail on empty arguments like any other
    /// bad input.
    fn fallback_text_field(&self) -> Option<&str> {
        None
    }

    async fn invoke(&self, arguments: Value) -> Result<Value>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Name-indexed set of tools, built at startup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions to expose to the completion engine.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_owned(),
                description: t.description().to_owned(),
                parameters: t.parameters(),
            })
            .collect();
        // Stable order for the engine prompt.
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of one tool invocation. `is_error` marks failures that were
/// converted into data at the boundary.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call_id: String,
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
}

/// Executes batches of tool calls with a per-call timeout and bounded
/// concurrency.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    max_concurrent: usize,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            registry,
            timeout,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute all calls of a batch. At most `max_concurrent` run at
    /// once; results come back in request order regardless of
    /// completion order. `fallback_text` is the most recent user text,
    /// used for empty-argument recovery on tools that opt in.
    pub async fn execute(
        &self,
        calls: &[ToolCall],
        fallback_text: Option<&str>,
    ) -> Vec<ToolOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        let futures: Vec<_> = calls
            .iter()
            .map(|call| {
                let sem = semaphore.clone();
                let registry = self.registry.clone();
                let timeout = self.timeout;
                let fallback = fallback_text.map(str::to_string);
                let call = call.clone();
                async move {
                    // The semaphore is never closed; a failed acquire
                    // cannot happen, but stay on the error boundary.
                    let _permit = match sem.acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => {
                            return error_outcome(&call, "executor shut down");
                        }
                    };
                    run_one(registry.as_ref(), &call, timeout, fallback.as_deref()).await
                }
            })
            .collect();

        // join_all preserves request order.
        futures_util::future::join_all(futures).await
    }
}

async fn run_one(
    registry: &ToolRegistry,
    call: &ToolCall,
    timeout: Duration,
    fallback_text: Option<&str>,
) -> ToolOutcome {
    let Some(tool) = registry.get(&call.tool_name) else {
        tracing::warn!(tool_name = %call.tool_name, "unknown tool requested");
        return error_outcome(call, &format!("unknown tool: {}", call.tool_name));
    };

    let arguments = effective_arguments(tool.as_ref(), call, fallback_text);

    tracing::debug!(
        tool_name = %call.tool_name,
        call_id = %call.call_id,
        "invoking tool"
    );

    match tokio::time::timeout(timeout, tool.invoke(arguments)).await {
        Ok(Ok(value)) => ToolOutcome {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            content: value_to_content(value),
            is_error: false,
        },
        Ok(Err(e)) => {
            tracing::warn!(tool_name = %call.tool_name, error = %e, "tool invocation failed");
            error_outcome(call, &e.to_string())
        }
        Err(_) => {
            tracing::warn!(
                tool_name = %call.tool_name,
                timeout_secs = timeout.as_secs(),
                "tool invocation timed out"
            );
            error_outcome(
                call,
                &format!("timed out after {}s", timeout.as_secs()),
            )
        }
    }
}

/// Apply empty-argument recovery: when the engine sends no usable
/// arguments and the tool names a fallback text field, substitute the
/// most recent user text into that field.
fn effective_arguments(tool: &dyn Tool, call: &ToolCall, fallback_text: Option<&str>) -> Value {
    let empty = match &call.arguments {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if !empty {
        return call.arguments.clone();
    }

    if let (Some(field), Some(text)) = (tool.fallback_text_field(), fallback_text) {
        tracing::warn!(
            tool_name = %call.tool_name,
            field = field,
            "tool called with empty arguments, recovering from last user message"
        );
        return serde_json::json!({ field: text });
    }

    call.arguments.clone()
}

fn error_outcome(call: &ToolCall, message: &str) -> ToolOutcome {
    ToolOutcome {
        call_id: call.call_id.clone(),
        tool_name: call.tool_name.clone(),
        content: format!("Error: {message}"),
        is_error: true,
    }
}

fn value_to_content(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
