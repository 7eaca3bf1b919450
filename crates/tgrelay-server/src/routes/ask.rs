use std::time::Duration;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tgrelay_core::{AskError, DEFAULT_ASK_TIMEOUT};
use tgrelay_schema::Question;

use crate::error::{ApiError, ApiJson};
use crate::state::AppState;

const QUESTIONS_REQUIRED: &str = "questions array required";

#[derive(Debug, Default, Deserialize)]
pub struct AskBody {
    pub questions: Option<Value>,
    /// Milliseconds.
    pub timeout: Option<u64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ask", post(ask))
        .route("/response/{id}", get(take_response))
}

/// Post the questions to the chat and hold the request open until a reply
/// arrives or the timeout passes.
pub async fn ask(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<AskBody>,
) -> Result<Json<Value>, ApiError> {
    let questions: Vec<Question> = body
        .questions
        .and_then(|q| serde_json::from_value(q).ok())
        .ok_or_else(|| ApiError::BadRequest(QUESTIONS_REQUIRED.to_string()))?;
    let timeout = body
        .timeout
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_ASK_TIMEOUT);

    match state.ctx.broker.ask(questions, timeout).await {
        Ok(response) => Ok(Json(json!({ "success": true, "response": response }))),
        Err(AskError::NoQuestions) => Err(ApiError::BadRequest(QUESTIONS_REQUIRED.to_string())),
        Err(AskError::Timeout { correlation_id }) => Err(ApiError::Timeout { correlation_id }),
        Err(err @ (AskError::Transport(_) | AskError::Task(_))) => Err(ApiError::Internal(err.to_string())),
    }
}

/// Non-blocking, read-once lookup of a recorded reply.
pub async fn take_response(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> Json<Value> {
    match state.ctx.broker.take_response(&correlation_id).await {
        Some(response) => Json(json!({ "found": true, "response": response })),
        None => Json(json!({ "found": false })),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use tgrelay_core::SelectOutcome;
    use tower::ServiceExt;

    use crate::routes::test_support::{get, json_body, post_json, test_app, wait_for_pending};

    const PROCEED: &str = r#"{"questions":[{"question":"Proceed?","options":[{"label":"Yes"},{"label":"No","description":"stop here"}]}]}"#;

    #[tokio::test]
    async fn ask_returns_selected_option() {
        let t = test_app();
        let request = tokio::spawn(t.app.clone().oneshot(post_json("/api/ask", PROCEED)));

        wait_for_pending(&t.ctx).await;
        t.ctx.broker.select_option(None, 0, 1).await;

        let response = request.await.unwrap().expect("send request");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["response"]["type"], "option");
        assert_eq!(body["response"]["value"], "No");
        assert_eq!(body["response"]["optionIndex"], 1);

        let keyboard = t.transport.sent()[0].keyboard.clone().unwrap();
        assert_eq!(keyboard.inline_keyboard[0].len(), 2);
    }

    #[tokio::test]
    async fn ask_times_out_with_408() {
        let t = test_app();
        let body = r#"{"questions":[{"question":"Still there?","options":[]}],"timeout":50}"#;
        let response = t
            .app
            .clone()
            .oneshot(post_json("/api/ask", body))
            .await
            .expect("send request");

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        let body = json_body(response).await;
        assert_eq!(body["error"], "timeout");
        let id = body["correlationId"].as_str().unwrap().to_string();
        assert_eq!(t.ctx.broker.pending_count().await, 0);

        let response = t
            .app
            .oneshot(get(&format!("/api/response/{id}")))
            .await
            .expect("send request");
        assert_eq!(json_body(response).await["found"], false);
    }

    #[tokio::test]
    async fn ask_requires_questions() {
        for body in [r#"{}"#, r#"{"questions":[]}"#, r#"{"questions":"nope"}"#] {
            let t = test_app();
            let response = t
                .app
                .oneshot(post_json("/api/ask", body))
                .await
                .expect("send request");
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(json_body(response).await["error"], "questions array required");
            assert!(t.transport.sent().is_empty());
        }
    }

    #[tokio::test]
    async fn disconnected_ask_is_purged_after_its_timeout() {
        let t = test_app();
        let body = r#"{"questions":[{"question":"Proceed?","options":[{"label":"Yes"}]}],"timeout":100}"#;
        let request = tokio::spawn(t.app.clone().oneshot(post_json("/api/ask", body)));
        wait_for_pending(&t.ctx).await;

        // The hook gives up on the long request before anyone answers.
        request.abort();
        let _ = request.await;

        for _ in 0..200 {
            if t.ctx.broker.pending_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(t.ctx.broker.pending_count().await, 0);
        assert_eq!(t.transport.edits().len(), 1);
        assert_eq!(
            t.ctx.broker.select_option(None, 0, 0).await,
            SelectOutcome::Expired
        );
    }

    #[tokio::test]
    async fn parked_ask_consumes_its_reply() {
        let t = test_app();
        let request = tokio::spawn(t.app.clone().oneshot(post_json("/api/ask", PROCEED)));
        wait_for_pending(&t.ctx).await;
        let id = t.ctx.broker.pending_snapshot().await[0].correlation_id.clone();

        t.ctx.broker.request_free_text(Some(&id)).await;
        t.ctx.broker.take_free_text("later").await;

        // Whoever reads first gets the reply: here the parked ask.
        let response = request.await.unwrap().expect("send request");
        assert_eq!(json_body(response).await["response"]["value"], "later");

        let response = t
            .app
            .oneshot(get(&format!("/api/response/{id}")))
            .await
            .expect("send request");
        assert_eq!(json_body(response).await, serde_json::json!({ "found": false }));
    }
}
