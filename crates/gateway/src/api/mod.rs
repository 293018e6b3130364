pub mod chat;
pub mod metrics;
pub mod sessions;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // Chat (core runtime)
        .route("/chat", post(chat::chat))
        .route("/chat/stream", post(chat::chat_stream))
        // Session management
        .route("/sessions/:id/stop", post(sessions::stop_session))
        .route("/sessions/:id", delete(sessions::delete_session))
        // Protocol metrics
        .route("/metrics", get(metrics::all_metrics))
        .route("/metrics/session/:id", get(metrics::session_metrics))
        .route("/metrics/export", post(metrics::export_metrics))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "pmm-agent",
        "model": state.config.llm.model,
        "active_sessions": state.orchestrator.sessions().session_count(),
    }))
}
