//! HTTP API endpoints.

pub mod alerts;
pub mod health;
pub mod schedules;
pub mod status;

use axum::Router;
use axum::http::StatusCode;

use crate::AppState;
use crate::error::StoreError;

/// Create the API router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(schedules::router())
        .merge(alerts::router())
        .merge(status::router())
}

/// Handler error: status code plus a plain-text message.
pub type ApiError = (StatusCode, String);

/// Map a store error to a response.
pub(crate) fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::Conflict(message) => (StatusCode::CONFLICT, message),
        other => {
            tracing::error!(error = %other, "Store error while handling request");
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}
