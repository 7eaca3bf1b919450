use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("{0}")]
    BadRequest(String),

    #[error("timeout")]
    Timeout { correlation_id: String },

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidJson | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = match &self {
            ApiError::Timeout { correlation_id } => {
                json!({ "error": "timeout", "correlationId": correlation_id })
            }
            other => json!({ "error": other.to_string() }),
        };
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        (status, Json(body)).into_response()
    }
}

/// JSON body extractor that accepts a missing content type and treats an
/// empty body as `{}`. Any parse failure becomes [`ApiError::InvalidJson`].
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|_| ApiError::InvalidJson)?;
        let raw: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &bytes
        };
        serde_json::from_slice(raw)
            .map(ApiJson)
            .map_err(|_| ApiError::InvalidJson)
    }
}
