use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tgrelay_schema::SessionUpdate;

use crate::error::ApiJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/session", post(update_session))
        .route("/commands", get(drain_commands))
}

/// Partial update: only the fields present in the body change.
pub async fn update_session(
    State(state): State<AppState>,
    ApiJson(update): ApiJson<SessionUpdate>,
) -> Json<Value> {
    let session = state.ctx.update_session(update).await;
    tracing::debug!(active = session.active, cwd = ?session.cwd, "session updated");
    Json(json!({ "success": true }))
}

pub async fn drain_commands(State(state): State<AppState>) -> Json<Value> {
    let commands = state.ctx.drain_commands().await;
    Json(json!({ "commands": commands }))
}
