//! Chat API endpoints.
//!
//! - `POST /chat`        — non-streaming: returns the full response
//! - `POST /chat/stream` — SSE streaming: fragments plus tool activity

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde::Deserialize;

use pmm_engine::turn::TurnEvent;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Explicit session ID. If absent, a fresh session is minted.
    #[serde(default)]
    pub session_id: Option<String>,
    /// User message text.
    pub message: String,
}

/// Use the provided session ID, or mint one for a new conversation.
fn resolve_session_id(requested: Option<String>) -> String {
    match requested {
        Some(id) if !id.trim().is_empty() => id,
        _ => uuid::Uuid::new_v4().to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /chat (non-streaming)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> impl IntoResponse {
    let session_id = resolve_session_id(body.session_id);
    let mut rx = state.orchestrator.submit_turn(&session_id, body.message);

    // Drain all events and collect the final response.
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();
    let mut errors = Vec::new();

    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Fragment { text } => content.push_str(&text),
            TurnEvent::ToolCall { call_id, tool_name } => {
                tool_calls.push(serde_json::json!({
                    "call_id": call_id,
                    "tool_name": tool_name,
                }));
            }
            TurnEvent::ToolResult {
                call_id,
                tool_name,
                is_error,
            } => {
                tool_results.push(serde_json::json!({
                    "call_id": call_id,
                    "tool_name": tool_name,
                    "is_error": is_error,
                }));
            }
            TurnEvent::Failed { reason, .. } => errors.push(reason),
            TurnEvent::Completed { .. } => {}
        }
    }

    Json(serde_json::json!({
        "session_id": session_id,
        "content": content,
        "tool_calls": tool_calls,
        "tool_results": tool_results,
        "errors": errors,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /chat/stream (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> impl IntoResponse {
    let session_id = resolve_session_id(body.session_id);
    let rx = state.orchestrator.submit_turn(&session_id, body.message);

    Sse::new(make_sse_stream(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn make_sse_stream(
    mut rx: tokio::sync::mpsc::Receiver<TurnEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let event_type = match &event {
                TurnEvent::Fragment { .. } => "fragment",
                TurnEvent::ToolCall { .. } => "tool_call",
                TurnEvent::ToolResult { .. } => "tool_result",
                TurnEvent::Completed { .. } => "completed",
                TurnEvent::Failed { .. } => "failed",
            };
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event(event_type).data(data));
        }
    }
}
