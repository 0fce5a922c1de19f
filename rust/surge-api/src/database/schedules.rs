//! Schedule store backed by the `scheduled_tasks` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::Database;
use crate::error::{StoreError, StoreResult};
use crate::scheduler::{CrontabSpec, IntervalSpec, NewScheduledTask, ScheduleKind, ScheduledTask};

/// Persistent schedule definitions.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Every definition, enabled or not, ordered by name.
    async fn list_tasks(&self) -> StoreResult<Vec<ScheduledTask>>;

    async fn get_task(&self, id: i64) -> StoreResult<Option<ScheduledTask>>;

    async fn find_task_by_name(&self, name: &str) -> StoreResult<Option<ScheduledTask>>;

    /// Insert a definition. Fails with [`StoreError::Conflict`] on a taken name.
    async fn create_task(&self, task: NewScheduledTask) -> StoreResult<ScheduledTask>;

    /// Overwrite the writable fields. Returns `None` when the row is gone.
    async fn update_task(&self, id: i64, task: NewScheduledTask)
    -> StoreResult<Option<ScheduledTask>>;

    async fn delete_task(&self, id: i64) -> StoreResult<bool>;

    /// Persist the run bookkeeping of one dispatch in a single transaction.
    async fn record_run(
        &self,
        id: i64,
        last_run_at: DateTime<Utc>,
        total_run_count: u64,
    ) -> StoreResult<()>;
}

const SELECT_COLUMNS: &str = "SELECT id, name, task, enabled, schedule_type,
    interval_days, interval_hours, interval_minutes, interval_seconds,
    crontab_minute, crontab_hour, crontab_day_of_week, crontab_day_of_month, crontab_month_of_year,
    last_run_at, total_run_count, date_created, date_changed
    FROM scheduled_tasks";

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let schedule_type: String = row.get(4)?;
    let total_run_count: i64 = row.get(15)?;
    Ok(ScheduledTask {
        id: row.get(0)?,
        name: row.get(1)?,
        task: row.get(2)?,
        enabled: row.get(3)?,
        schedule_type: ScheduleKind::from_db(&schedule_type),
        interval: IntervalSpec {
            days: row.get(5)?,
            hours: row.get(6)?,
            minutes: row.get(7)?,
            seconds: row.get(8)?,
        },
        crontab: CrontabSpec {
            minute: row.get(9)?,
            hour: row.get(10)?,
            day_of_week: row.get(11)?,
            day_of_month: row.get(12)?,
            month_of_year: row.get(13)?,
        },
        last_run_at: row.get(14)?,
        total_run_count: u64::try_from(total_run_count).unwrap_or(0),
        date_created: row.get(16)?,
        date_changed: row.get(17)?,
    })
}

fn fetch_by_id(conn: &Connection, id: i64) -> StoreResult<Option<ScheduledTask>> {
    let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], row_to_task).optional()?)
}

fn run_count(total_run_count: u64) -> StoreResult<i64> {
    i64::try_from(total_run_count)
        .map_err(|e| StoreError::Corrupt(format!("run count {total_run_count}: {e}")))
}

#[async_trait]
impl ScheduleStore for Database {
    async fn list_tasks(&self) -> StoreResult<Vec<ScheduledTask>> {
        self.call(|conn| {
            let sql = format!("{SELECT_COLUMNS} ORDER BY name");
            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map([], row_to_task)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
        .await
    }

    async fn get_task(&self, id: i64) -> StoreResult<Option<ScheduledTask>> {
        self.call(move |conn| fetch_by_id(conn, id)).await
    }

    async fn find_task_by_name(&self, name: &str) -> StoreResult<Option<ScheduledTask>> {
        let name = name.to_string();
        self.call(move |conn| {
            let sql = format!("{SELECT_COLUMNS} WHERE name = ?1");
            Ok(conn.query_row(&sql, params![name], row_to_task).optional()?)
        })
        .await
    }

    async fn create_task(&self, task: NewScheduledTask) -> StoreResult<ScheduledTask> {
        self.call(move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO scheduled_tasks (
                    name, task, enabled, schedule_type,
                    interval_days, interval_hours, interval_minutes, interval_seconds,
                    crontab_minute, crontab_hour, crontab_day_of_week,
                    crontab_day_of_month, crontab_month_of_year,
                    total_run_count, date_created, date_changed
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0, ?14, ?14)",
                params![
                    task.name,
                    task.task,
                    task.enabled,
                    task.schedule_type.as_str(),
                    task.interval.days,
                    task.interval.hours,
                    task.interval.minutes,
                    task.interval.seconds,
                    task.crontab.minute,
                    task.crontab.hour,
                    task.crontab.day_of_week,
                    task.crontab.day_of_month,
                    task.crontab.month_of_year,
                    now,
                ],
            )
            .map_err(|e| StoreError::from_write(e, &format!("Schedule '{}'", task.name)))?;

            let id = conn.last_insert_rowid();
            fetch_by_id(conn, id)?
                .ok_or_else(|| StoreError::Corrupt(format!("schedule {id} vanished after insert")))
        })
        .await
    }

    async fn update_task(
        &self,
        id: i64,
        task: NewScheduledTask,
    ) -> StoreResult<Option<ScheduledTask>> {
        self.call(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE scheduled_tasks SET
                        name = ?2, task = ?3, enabled = ?4, schedule_type = ?5,
                        interval_days = ?6, interval_hours = ?7,
                        interval_minutes = ?8, interval_seconds = ?9,
                        crontab_minute = ?10, crontab_hour = ?11, crontab_day_of_week = ?12,
                        crontab_day_of_month = ?13, crontab_month_of_year = ?14,
                        date_changed = ?15
                     WHERE id = ?1",
                    params![
                        id,
                        task.name,
                        task.task,
                        task.enabled,
                        task.schedule_type.as_str(),
                        task.interval.days,
                        task.interval.hours,
                        task.interval.minutes,
                        task.interval.seconds,
                        task.crontab.minute,
                        task.crontab.hour,
                        task.crontab.day_of_week,
                        task.crontab.day_of_month,
                        task.crontab.month_of_year,
                        Utc::now(),
                    ],
                )
                .map_err(|e| StoreError::from_write(e, &format!("Schedule '{}'", task.name)))?;

            if changed == 0 {
                return Ok(None);
            }
            fetch_by_id(conn, id)
        })
        .await
    }

    async fn delete_task(&self, id: i64) -> StoreResult<bool> {
        self.call(move |conn| {
            let deleted = conn.execute("DELETE FROM scheduled_tasks WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn record_run(
        &self,
        id: i64,
        last_run_at: DateTime<Utc>,
        total_run_count: u64,
    ) -> StoreResult<()> {
        let count = run_count(total_run_count)?;
        self.transaction(move |tx| {
            tx.execute(
                "UPDATE scheduled_tasks SET last_run_at = ?2, total_run_count = ?3 WHERE id = ?1",
                params![id, last_run_at, count],
            )?;
            Ok(())
        })
        .await
    }
}
