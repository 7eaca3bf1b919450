use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tgrelay_core::formatter::{format_event, format_notification};

use crate::error::{ApiError, ApiJson};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyBody {
    pub message: Option<String>,
    pub status: Option<String>,
    pub project: Option<String>,
    pub event_type: Option<String>,
    pub tool_name: Option<String>,
    pub input: Option<Value>,
    pub result: Option<Value>,
    pub data: Option<Value>,
}

impl NotifyBody {
    /// Flatten into the formatter payload; keys in `data` win over the top-level ones.
    fn event_data(self) -> Value {
        let mut map = Map::new();
        if let Some(project) = self.project {
            map.insert("project".into(), Value::String(project));
        }
        if let Some(tool) = self.tool_name {
            map.insert("toolName".into(), Value::String(tool));
        }
        if let Some(input) = self.input {
            map.insert("input".into(), input);
        }
        if let Some(result) = self.result {
            map.insert("result".into(), result);
        }
        if let Some(Value::Object(extra)) = self.data {
            map.extend(extra);
        }
        Value::Object(map)
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/notify", post(notify))
}

pub async fn notify(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<NotifyBody>,
) -> Result<Json<Value>, ApiError> {
    let ctx = &state.ctx;

    let text = match body.event_type.clone().filter(|e| !e.is_empty()) {
        Some(event_type) => {
            let verbose = ctx.verbose().await;
            match format_event(&event_type, &body.event_data(), verbose) {
                Some(text) => text,
                None => {
                    tracing::debug!(%event_type, verbose, "event skipped");
                    return Ok(Json(json!({ "success": true, "skipped": true })));
                }
            }
        }
        None => {
            let Some(message) = body.message.as_deref().filter(|m| !m.is_empty()) else {
                return Err(ApiError::BadRequest(
                    "message or eventType required".to_string(),
                ));
            };
            format_notification(message, body.status.as_deref(), body.project.as_deref())
        }
    };

    ctx.transport
        .send_message(ctx.chat_id().await, &text)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(Json(json!({ "success": true })))
}
