//! Sync status endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ApiError, store_error};
use crate::AppState;
use crate::sync::SURGE_ALERTS_JOB;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/status", get(sync_status))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Completion time of the last successful surge alert sync.
    pub surge_api_last_run: Option<DateTime<Utc>>,
}

/// `GET /api/v1/status`
pub async fn sync_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let surge_api_last_run = state
        .db
        .api_status(SURGE_ALERTS_JOB)
        .await
        .map_err(store_error)?;
    Ok(Json(StatusResponse { surge_api_last_run }))
}
