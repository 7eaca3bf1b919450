pub mod ask;
pub mod health;
pub mod notify;
pub mod session;

use axum::Router;

use crate::error::ApiError;
use crate::state::AppState;

pub fn health_router() -> Router<AppState> {
    health::router()
}

pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(notify::router())
        .merge(ask::router())
        .merge(session::router())
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
