//! Protocol metrics endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// `GET /metrics` — per-session rollups plus global totals.
pub async fn all_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.all_metrics())
}

/// `GET /metrics/session/:id` — rollup for one session.
pub async fn session_metrics(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.session_metrics(&session_id) {
        Some(metrics) => Json(metrics).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no turns recorded for session" })),
        )
            .into_response(),
    }
}

/// `POST /metrics/export` — full snapshot including every turn record.
pub async fn export_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.export_metrics())
}
