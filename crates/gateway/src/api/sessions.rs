//! Session management endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// `POST /sessions/:id/stop` — cancel the running turn, if any.
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let cancelled = state.orchestrator.cancel(&session_id);
    Json(serde_json::json!({
        "session_id": session_id,
        "cancelled": cancelled,
    }))
}

/// `DELETE /sessions/:id` — drop the session and its history.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    if state.orchestrator.sessions().remove(&session_id) {
        Json(serde_json::json!({ "deleted": true })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "session not found" })),
        )
            .into_response()
    }
}
