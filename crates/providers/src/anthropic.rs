//! Anthropic-native adapter.
//!
//! Implements the non-streaming Anthropic Messages API including tool
//! use and the Anthropic-specific message structure where system
//! messages go in a separate top-level `system` field.

use serde_json::Value;

use pmm_domain::config::LlmConfig;
use pmm_domain::error::{Error, Result};
use pmm_domain::message::{
    ContentPart, Message, MessageContent, ResponseContent, Role, ToolDefinition,
};

use crate::traits::{CompletionEngine, EngineResponse};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A completion engine adapter for the Anthropic Messages API.
pub struct AnthropicEngine {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicEngine {
    /// Create a new engine from the deserialized config.
    ///
    /// The API key env var is resolved here, once, so a missing key
    /// fails at startup instead of on the first turn.
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env).map_err(|_| {
            Error::Config(format!(
                "environment variable {} is not set; export it before starting the server",
                cfg.api_key_env
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }
}

#[async_trait::async_trait]
impl CompletionEngine for AnthropicEngine {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<EngineResponse> {
        let body = build_messages_body(&self.model, self.max_tokens, messages, tools);
        let url = format!("{}/v1/messages", self.base_url);

        tracing::debug!(
            model = %self.model,
            message_count = messages.len(),
            tool_count = tools.len(),
            "anthropic completion request"
        );

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("anthropic request: {e}"))
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        let status = resp.status();
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("reading anthropic response: {e}")))?;

        if !status.is_success() {
            let message = payload
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Err(Error::Engine {
                engine: "anthropic".into(),
                message: format!("HTTP {status}: {message}"),
            });
        }

        parse_response(&payload)
    }

    fn engine_id(&self) -> &str {
        "anthropic"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_messages_body(
    model: &str,
    max_tokens: u32,
    messages: &[Message],
    tools: &[ToolDefinition],
) -> Value {
    // Separate out system messages.
    let mut system_parts: Vec<String> = Vec::new();
    let mut api_messages: Vec<Value> = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                if let Some(t) = msg.content.text() {
                    system_parts.push(t.to_string());
                }
            }
            Role::User => {
                api_messages.push(user_msg_to_anthropic(msg));
            }
            Role::Assistant => {
                api_messages.push(assistant_msg_to_anthropic(msg));
            }
            Role::Tool => {
                // Anthropic expects tool results as user messages with
                // tool_result content blocks.
                api_messages.push(tool_result_to_anthropic(msg));
            }
        }
    }

    let mut body = serde_json::json!({
        "model": model,
        "messages": api_messages,
        "max_tokens": max_tokens,
    });

    if !system_parts.is_empty() {
        body["system"] = Value::String(system_parts.join("\n\n"));
    }

    if !tools.is_empty() {
        let tools: Vec<Value> = tools.iter().map(tool_to_anthropic).collect();
        body["tools"] = Value::Array(tools);
    }

    body
}

fn user_msg_to_anthropic(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({
            "role": "user",
            "content": t,
        }),
        MessageContent::Parts(parts) => {
            let content: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(serde_json::json!({
                        "type": "text",
                        "text": text,
                    })),
                    _ => None,
                })
                .collect();
            serde_json::json!({
                "role": "user",
                "content": content,
            })
        }
    }
}

fn assistant_msg_to_anthropic(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({
            "role": "assistant",
            "content": [{"type": "text", "text": t}],
        }),
        MessageContent::Parts(parts) => {
            let content: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(serde_json::json!({
                        "type": "text",
                        "text": text,
                    })),
                    ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": input,
                    })),
                    _ => None,
                })
                .collect();
            serde_json::json!({
                "role": "assistant",
                "content": content,
            })
        }
    }
}

fn tool_result_to_anthropic(msg: &Message) -> Value {
    // Anthropic: tool results are user messages with tool_result content blocks.
    let content: Vec<Value> = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => Some(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                    "is_error": is_error,
                })),
                _ => None,
            })
            .collect(),
        MessageContent::Text(t) => {
            vec![serde_json::json!({
                "type": "tool_result",
                "tool_use_id": "",
                "content": t,
            })]
        }
    };
    serde_json::json!({
        "role": "user",
        "content": content,
    })
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_response(body: &Value) -> Result<EngineResponse> {
    let empty = Vec::new();
    let content_arr = body
        .get("content")
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);

    let mut blocks: Vec<ContentPart> = Vec::new();

    for block in content_arr {
        let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
        match block_type {
            "text" => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    blocks.push(ContentPart::Text {
                        text: t.to_string(),
                    });
                }
            }
            "tool_use" => {
                let id = block
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let name = block
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let input = block
                    .get("input")
                    .cloned()
                    .unwrap_or(Value::Object(Default::default()));
                blocks.push(ContentPart::ToolUse { id, name, input });
            }
            _ => {}
        }
    }

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let stop_reason = body
        .get("stop_reason")
        .and_then(|v| v.as_str())
        .map(|s| match s {
            "end_turn" => "stop".to_string(),
            "tool_use" => "tool_calls".to_string(),
            other => other.to_string(),
        });

    Ok(EngineResponse {
        content: ResponseContent::Blocks(blocks),
        model,
        stop_reason,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_hoisted_to_top_level_field() {
        let messages = vec![
            Message::system("be helpful"),
            Message::user("hi"),
        ];
        let body = build_messages_body("m", 1024, &messages, &[]);
        assert_eq!(body["system"], "be helpful");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn tool_definitions_use_input_schema_key() {
        let tools = vec![ToolDefinition {
            name: "analyze_product".into(),
            description: "desc".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let body = build_messages_body("m", 1024, &[Message::user("hi")], &tools);
        assert_eq!(body["tools"][0]["name"], "analyze_product");
        assert!(body["tools"][0].get("input_schema").is_some());
    }

    #[test]
    fn tool_results_become_user_messages() {
        let messages = vec![Message::tool_result("call_1", "42", false)];
        let body = build_messages_body("m", 1024, &messages, &[]);
        let msg = &body["messages"][0];
        assert_eq!(msg["role"], "user");
        assert_eq!(msg["content"][0]["type"], "tool_result");
        assert_eq!(msg["content"][0]["tool_use_id"], "call_1");
    }

    #[test]
    fn parse_response_collects_text_and_tool_use_blocks() {
        let body = serde_json::json!({
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "tool_use",
            "content": [
                {"type": "text", "text": "let me check"},
                {"type": "tool_use", "id": "c1", "name": "analyze_product", "input": {"product_description": "x"}},
            ],
        });
        let resp = parse_response(&body).unwrap();
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_calls"));
        match resp.content {
            ResponseContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert!(matches!(blocks[1], ContentPart::ToolUse { ref name, .. } if name == "analyze_product"));
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn parse_response_maps_end_turn_to_stop() {
        let body = serde_json::json!({
            "model": "m",
            "stop_reason": "end_turn",
            "content": [{"type": "text", "text": "done"}],
        });
        let resp = parse_response(&body).unwrap();
        assert_eq!(resp.stop_reason.as_deref(), Some("stop"));
    }
}
