//! Schedule management API endpoints.
//!
//! CRUD over the `scheduled_tasks` table plus a manual trigger. Run
//! bookkeeping (`last_run_at`, `total_run_count`) is read-only here.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::{ApiError, store_error};
use crate::AppState;
use crate::database::ScheduleStore;
use crate::scheduler::{
    CrontabSpec, FETCH_SURGE_ALERTS_TASK, IntervalSpec, NewScheduledTask, ScheduleKind,
    ScheduledTask, TASK_CHOICES,
};

/// Create the schedules router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/schedules", get(list_schedules).post(create_schedule))
        .route(
            "/api/v1/schedules/{id}",
            get(get_schedule)
                .patch(update_schedule)
                .delete(delete_schedule),
        )
        .route("/api/v1/schedules/{id}/run", post(run_schedule))
        .route("/api/v1/schedules/tasks", get(list_task_choices))
}

/// Request to create a schedule. Omitted fields take the table defaults.
#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub name: String,
    #[serde(default = "default_task")]
    pub task: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub schedule_type: ScheduleKind,
    pub interval_days: Option<u32>,
    pub interval_hours: Option<u32>,
    pub interval_minutes: Option<u32>,
    pub interval_seconds: Option<u32>,
    pub crontab_minute: Option<String>,
    pub crontab_hour: Option<String>,
    pub crontab_day_of_week: Option<String>,
    pub crontab_day_of_month: Option<String>,
    pub crontab_month_of_year: Option<String>,
}

fn default_task() -> String {
    FETCH_SURGE_ALERTS_TASK.to_string()
}

fn default_enabled() -> bool {
    true
}

impl CreateScheduleRequest {
    fn into_definition(self) -> NewScheduledTask {
        let star = || "*".to_string();
        NewScheduledTask {
            name: self.name,
            task: self.task,
            enabled: self.enabled,
            schedule_type: self.schedule_type,
            interval: IntervalSpec {
                days: self.interval_days,
                hours: self.interval_hours,
                minutes: self.interval_minutes,
                seconds: self.interval_seconds,
            },
            crontab: CrontabSpec {
                minute: self.crontab_minute.unwrap_or_else(star),
                hour: self.crontab_hour.unwrap_or_else(star),
                day_of_week: self.crontab_day_of_week.unwrap_or_else(star),
                day_of_month: self.crontab_day_of_month.unwrap_or_else(star),
                month_of_year: self.crontab_month_of_year.unwrap_or_else(star),
            },
        }
    }
}

/// Partial update. Interval fields may be set to `null` to clear them.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateScheduleRequest {
    pub name: Option<String>,
    pub task: Option<String>,
    pub enabled: Option<bool>,
    pub schedule_type: Option<ScheduleKind>,
    #[serde(default, deserialize_with = "nullable")]
    pub interval_days: Option<Option<u32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub interval_hours: Option<Option<u32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub interval_minutes: Option<Option<u32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub interval_seconds: Option<Option<u32>>,
    pub crontab_minute: Option<String>,
    pub crontab_hour: Option<String>,
    pub crontab_day_of_week: Option<String>,
    pub crontab_day_of_month: Option<String>,
    pub crontab_month_of_year: Option<String>,
}

/// Distinguish an explicit `null` (`Some(None)`) from an absent key (`None`).
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl UpdateScheduleRequest {
    fn apply(self, def: &mut NewScheduledTask) {
        if let Some(name) = self.name {
            def.name = name;
        }
        if let Some(task) = self.task {
            def.task = task;
        }
        if let Some(enabled) = self.enabled {
            def.enabled = enabled;
        }
        if let Some(kind) = self.schedule_type {
            def.schedule_type = kind;
        }
        for (update, slot) in [
            (self.interval_days, &mut def.interval.days),
            (self.interval_hours, &mut def.interval.hours),
            (self.interval_minutes, &mut def.interval.minutes),
            (self.interval_seconds, &mut def.interval.seconds),
        ] {
            if let Some(value) = update {
                *slot = value;
            }
        }
        for (update, slot) in [
            (self.crontab_minute, &mut def.crontab.minute),
            (self.crontab_hour, &mut def.crontab.hour),
            (self.crontab_day_of_week, &mut def.crontab.day_of_week),
            (self.crontab_day_of_month, &mut def.crontab.day_of_month),
            (self.crontab_month_of_year, &mut def.crontab.month_of_year),
        ] {
            if let Some(value) = update {
                *slot = value;
            }
        }
    }
}

/// Schedule response.
#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    #[serde(flatten)]
    pub schedule: ScheduledTask,
    /// e.g. `every 1 hour, 30 minutes` or `cron: 0 */1 * * *`.
    pub schedule_display: String,
}

impl From<ScheduledTask> for ScheduleResponse {
    fn from(schedule: ScheduledTask) -> Self {
        let schedule_display = schedule.schedule_display();
        Self {
            schedule,
            schedule_display,
        }
    }
}

/// Outcome of a manual trigger.
#[derive(Debug, Serialize)]
pub struct RunResponse {
    /// `success`, `warning` or `error`.
    pub level: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<u64>,
}

#[derive(Debug, Serialize)]
struct TaskChoice {
    task: &'static str,
    label: &'static str,
}

fn bad_request(message: String) -> ApiError {
    (StatusCode::BAD_REQUEST, message)
}

fn not_found() -> ApiError {
    (StatusCode::NOT_FOUND, "Schedule not found".to_string())
}

/// `GET /api/v1/schedules`
pub async fn list_schedules(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let tasks = state.db.list_tasks().await.map_err(store_error)?;
    let responses: Vec<ScheduleResponse> = tasks.into_iter().map(Into::into).collect();
    Ok(Json(responses))
}

/// `POST /api/v1/schedules`
pub async fn create_schedule(
    State(state): State<AppState>,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let def = req.into_definition();
    def.validate().map_err(bad_request)?;

    let created = state.db.create_task(def).await.map_err(store_error)?;
    tracing::info!(schedule = %created.name, id = created.id, "Schedule created");
    Ok((StatusCode::CREATED, Json(ScheduleResponse::from(created))))
}

/// `GET /api/v1/schedules/{id}`
pub async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .db
        .get_task(id)
        .await
        .map_err(store_error)?
        .ok_or_else(not_found)?;
    Ok(Json(ScheduleResponse::from(task)))
}

/// `PATCH /api/v1/schedules/{id}`
pub async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateScheduleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let existing = state
        .db
        .get_task(id)
        .await
        .map_err(store_error)?
        .ok_or_else(not_found)?;

    let mut def = NewScheduledTask::from(&existing);
    req.apply(&mut def);
    def.validate().map_err(bad_request)?;

    let updated = state
        .db
        .update_task(id, def)
        .await
        .map_err(store_error)?
        .ok_or_else(not_found)?;
    Ok(Json(ScheduleResponse::from(updated)))
}

/// `DELETE /api/v1/schedules/{id}`
pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.db.delete_task(id).await.map_err(store_error)? {
        tracing::info!(id, "Schedule deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found())
    }
}

/// `POST /api/v1/schedules/{id}/run`
///
/// Runs the schedule's task synchronously. Failures are reported in the
/// body rather than as a transport error.
pub async fn run_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    let task = state
        .db
        .get_task(id)
        .await
        .map_err(store_error)?
        .ok_or_else(not_found)?;

    if task.task != FETCH_SURGE_ALERTS_TASK {
        return Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(RunResponse {
                level: "warning",
                message: format!("Manual execution not supported for task \"{}\"", task.name),
                created: None,
                updated: None,
            }),
        ));
    }

    match state.sync.run().await {
        Ok(summary) => {
            tracing::info!(
                schedule = %task.name,
                created = summary.created,
                updated = summary.updated,
                "Manual run finished"
            );
            Ok((
                StatusCode::OK,
                Json(RunResponse {
                    level: "success",
                    message: format!(
                        "Successfully ran task \"{}\". Created: {}, Updated: {}",
                        task.name, summary.created, summary.updated
                    ),
                    created: Some(summary.created),
                    updated: Some(summary.updated),
                }),
            ))
        }
        Err(e) => {
            tracing::error!(schedule = %task.name, error = %e, "Manual run failed");
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RunResponse {
                    level: "error",
                    message: format!("Error running task \"{}\": {e}", task.name),
                    created: None,
                    updated: None,
                }),
            ))
        }
    }
}

/// `GET /api/v1/schedules/tasks`
async fn list_task_choices() -> Json<Vec<TaskChoice>> {
    Json(
        TASK_CHOICES
            .iter()
            .map(|&(task, label)| TaskChoice { task, label })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_defaults() {
        let req: CreateScheduleRequest =
            serde_json::from_str(r#"{"name": "hourly", "interval_hours": 1}"#).unwrap();
        let def = req.into_definition();
        assert_eq!(def.task, FETCH_SURGE_ALERTS_TASK);
        assert!(def.enabled);
        assert_eq!(def.schedule_type, ScheduleKind::Interval);
        assert_eq!(def.crontab, CrontabSpec::default());
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_update_distinguishes_null_from_absent() {
        let mut def = NewScheduledTask {
            name: "x".into(),
            task: FETCH_SURGE_ALERTS_TASK.into(),
            enabled: true,
            schedule_type: ScheduleKind::Interval,
            interval: IntervalSpec {
                hours: Some(1),
                minutes: Some(30),
                ..IntervalSpec::default()
            },
            crontab: CrontabSpec::default(),
        };
        let req: UpdateScheduleRequest =
            serde_json::from_str(r#"{"interval_minutes": null, "enabled": false}"#).unwrap();
        req.apply(&mut def);
        assert_eq!(def.interval.hours, Some(1));
        assert_eq!(def.interval.minutes, None);
        assert!(!def.enabled);
    }
}
