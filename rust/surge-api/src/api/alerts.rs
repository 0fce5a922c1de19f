//! Read-only surge alert endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use super::{ApiError, store_error};
use crate::AppState;
use crate::database::{AlertFilter, AlertPage, FilterOptions, SurgeAlert};

/// Create the alerts router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/alerts", get(list_alerts))
        .route("/api/v1/alerts/filters", get(filter_options))
        .route("/api/v1/alerts/{api_id}", get(get_alert))
}

/// `GET /api/v1/alerts?country=&status=&tag=&page=`
///
/// Newest first, twenty per page.
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(filter): Query<AlertFilter>,
) -> Result<Json<AlertPage>, ApiError> {
    let page = state.db.list_alerts(filter).await.map_err(store_error)?;
    Ok(Json(page))
}

/// `GET /api/v1/alerts/filters`
pub async fn filter_options(
    State(state): State<AppState>,
) -> Result<Json<FilterOptions>, ApiError> {
    let options = state.db.filter_options().await.map_err(store_error)?;
    Ok(Json(options))
}

/// `GET /api/v1/alerts/{api_id}`
pub async fn get_alert(
    State(state): State<AppState>,
    Path(api_id): Path<i64>,
) -> Result<Json<SurgeAlert>, ApiError> {
    state
        .db
        .get_alert(api_id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Alert {api_id} not found")))
}
