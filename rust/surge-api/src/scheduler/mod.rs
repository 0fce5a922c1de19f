//! Database-backed periodic scheduler.
//!
//! Schedule definitions live in the `scheduled_tasks` table rather than in
//! static configuration. [`DatabaseScheduler`] re-reads them periodically,
//! evaluates each [`ScheduleEntry`] and hands due tasks to a
//! [`TaskDispatcher`].

pub mod cron;
pub mod defaults;
pub mod dispatch;
pub mod entry;
pub mod executor;

pub use cron::{CronExpression, CronParser};
pub use defaults::{DefaultSchedule, DefaultTiming, SeedReport, default_beat_schedule, init_scheduler};
pub use dispatch::{SurgeTaskDispatcher, TaskDispatcher};
pub use entry::{DueCheck, Schedule, ScheduleEntry};
pub use executor::{DatabaseScheduler, SchedulerState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task identifier of the surge alert fetch.
pub const FETCH_SURGE_ALERTS_TASK: &str = "surge.tasks.fetch_surge_alerts";

/// Tasks a schedule may point at, with their display labels.
pub const TASK_CHOICES: &[(&str, &str)] = &[(FETCH_SURGE_ALERTS_TASK, "Fetch Surge Alerts")];

/// Maximum stored length of a crontab field.
pub const CRONTAB_FIELD_MAX_LEN: usize = 64;

/// Which set of schedule fields is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    /// Fixed period built from the interval fields.
    #[default]
    Interval,
    /// Five-field crontab pattern.
    Crontab,
    /// Stored kind was not recognised. Evaluates as hourly.
    Unspecified,
}

impl ScheduleKind {
    /// Value stored in the `schedule_type` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interval => "interval",
            Self::Crontab => "crontab",
            Self::Unspecified => "unspecified",
        }
    }

    /// Parse a stored `schedule_type` value.
    pub fn from_db(value: &str) -> Self {
        match value {
            "interval" => Self::Interval,
            "crontab" | "cron" => Self::Crontab,
            _ => Self::Unspecified,
        }
    }
}

/// Interval components. Unset fields contribute zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSpec {
    pub days: Option<u32>,
    pub hours: Option<u32>,
    pub minutes: Option<u32>,
    pub seconds: Option<u32>,
}

impl IntervalSpec {
    /// Sum of all set components, in seconds.
    pub fn total_seconds(&self) -> u64 {
        u64::from(self.seconds.unwrap_or(0))
            + u64::from(self.minutes.unwrap_or(0)) * 60
            + u64::from(self.hours.unwrap_or(0)) * 3_600
            + u64::from(self.days.unwrap_or(0)) * 86_400
    }

    /// Split a duration into days, hours, minutes and seconds, leaving zero
    /// components unset.
    pub fn from_duration(duration: std::time::Duration) -> Self {
        let total = duration.as_secs();
        let nonzero = |v: u64| u32::try_from(v).ok().filter(|v| *v > 0);
        Self {
            days: nonzero(total / 86_400),
            hours: nonzero(total % 86_400 / 3_600),
            minutes: nonzero(total % 3_600 / 60),
            seconds: nonzero(total % 60),
        }
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = [
            (self.days, "day"),
            (self.hours, "hour"),
            (self.minutes, "minute"),
            (self.seconds, "second"),
        ]
        .into_iter()
        .filter_map(|(value, unit)| {
            value.map(|v| {
                if v == 1 {
                    format!("{v} {unit}")
                } else {
                    format!("{v} {unit}s")
                }
            })
        })
        .collect();

        if parts.is_empty() {
            "every 1 hour (default)".to_string()
        } else {
            format!("every {}", parts.join(", "))
        }
    }
}

/// Crontab components, in the order the table stores them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrontabSpec {
    pub minute: String,
    pub hour: String,
    pub day_of_week: String,
    pub day_of_month: String,
    pub month_of_year: String,
}

impl Default for CrontabSpec {
    fn default() -> Self {
        Self {
            minute: "*".to_string(),
            hour: "*".to_string(),
            day_of_week: "*".to_string(),
            day_of_month: "*".to_string(),
            month_of_year: "*".to_string(),
        }
    }
}

impl CrontabSpec {
    /// Standard cron ordering: `minute hour day-of-month month day-of-week`.
    pub fn expression(&self) -> String {
        format!(
            "{} {} {} {} {}",
            or_star(&self.minute),
            or_star(&self.hour),
            or_star(&self.day_of_month),
            or_star(&self.month_of_year),
            or_star(&self.day_of_week)
        )
    }

    /// Copy with every field cut down to [`CRONTAB_FIELD_MAX_LEN`] characters.
    #[must_use]
    pub fn truncated(&self) -> Self {
        let cut = |s: &str| s.chars().take(CRONTAB_FIELD_MAX_LEN).collect::<String>();
        Self {
            minute: cut(&self.minute),
            hour: cut(&self.hour),
            day_of_week: cut(&self.day_of_week),
            day_of_month: cut(&self.day_of_month),
            month_of_year: cut(&self.month_of_year),
        }
    }

    /// Parse into an evaluable expression.
    pub fn parse(&self) -> anyhow::Result<CronExpression> {
        CronParser::from_fields(
            or_star(&self.minute),
            or_star(&self.hour),
            or_star(&self.day_of_week),
            or_star(&self.day_of_month),
            or_star(&self.month_of_year),
        )
    }
}

fn or_star(field: &str) -> &str {
    let trimmed = field.trim();
    if trimmed.is_empty() { "*" } else { trimmed }
}

/// A schedule definition as stored in `scheduled_tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Row id.
    pub id: i64,
    /// Unique display name.
    pub name: String,
    /// Task identifier handed to the dispatcher.
    pub task: String,
    /// Disabled tasks stay listed but never fire.
    pub enabled: bool,
    pub schedule_type: ScheduleKind,
    pub interval: IntervalSpec,
    pub crontab: CrontabSpec,
    /// Last dispatch time.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Number of dispatches so far.
    pub total_run_count: u64,
    pub date_created: DateTime<Utc>,
    pub date_changed: DateTime<Utc>,
}

impl ScheduledTask {
    /// Human-readable description of the active schedule.
    pub fn schedule_display(&self) -> String {
        match self.schedule_type {
            ScheduleKind::Interval => self.interval.describe(),
            ScheduleKind::Crontab => format!("cron: {}", self.crontab.expression()),
            ScheduleKind::Unspecified => "every 1 hour (default)".to_string(),
        }
    }
}

/// Writable fields of a schedule definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScheduledTask {
    pub name: String,
    pub task: String,
    pub enabled: bool,
    pub schedule_type: ScheduleKind,
    pub interval: IntervalSpec,
    pub crontab: CrontabSpec,
}

impl From<&ScheduledTask> for NewScheduledTask {
    fn from(task: &ScheduledTask) -> Self {
        Self {
            name: task.name.clone(),
            task: task.task.clone(),
            enabled: task.enabled,
            schedule_type: task.schedule_type,
            interval: task.interval,
            crontab: task.crontab.clone(),
        }
    }
}

impl NewScheduledTask {
    /// Check the definition before it is written.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if !TASK_CHOICES.iter().any(|(id, _)| *id == self.task) {
            return Err(format!("unknown task: {}", self.task));
        }
        for (value, field) in [
            (self.interval.days, "interval_days"),
            (self.interval.hours, "interval_hours"),
            (self.interval.minutes, "interval_minutes"),
            (self.interval.seconds, "interval_seconds"),
        ] {
            if value == Some(0) {
                return Err(format!("{field} must be at least 1"));
            }
        }
        match self.schedule_type {
            ScheduleKind::Interval => Ok(()),
            ScheduleKind::Crontab => {
                for field in [
                    &self.crontab.minute,
                    &self.crontab.hour,
                    &self.crontab.day_of_week,
                    &self.crontab.day_of_month,
                    &self.crontab.month_of_year,
                ] {
                    if field.chars().count() > CRONTAB_FIELD_MAX_LEN {
                        return Err(format!(
                            "crontab fields are limited to {CRONTAB_FIELD_MAX_LEN} characters"
                        ));
                    }
                }
                self.crontab
                    .parse()
                    .map(|_| ())
                    .map_err(|e| format!("invalid crontab: {e:#}"))
            }
            ScheduleKind::Unspecified => Err("schedule_type must be interval or crontab".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(kind: ScheduleKind) -> NewScheduledTask {
        NewScheduledTask {
            name: "Hourly fetch".to_string(),
            task: FETCH_SURGE_ALERTS_TASK.to_string(),
            enabled: true,
            schedule_type: kind,
            interval: IntervalSpec::default(),
            crontab: CrontabSpec::default(),
        }
    }

    #[test]
    fn test_interval_total_seconds() {
        let spec = IntervalSpec {
            days: Some(1),
            hours: Some(2),
            minutes: Some(3),
            seconds: Some(4),
        };
        assert_eq!(spec.total_seconds(), 86_400 + 7_200 + 180 + 4);
        assert_eq!(IntervalSpec::default().total_seconds(), 0);
    }

    #[test]
    fn test_interval_from_duration_skips_zero_parts() {
        let spec = IntervalSpec::from_duration(std::time::Duration::from_secs(90_000));
        assert_eq!(spec.days, Some(1));
        assert_eq!(spec.hours, Some(1));
        assert_eq!(spec.minutes, None);
        assert_eq!(spec.seconds, None);
    }

    #[test]
    fn test_crontab_expression_order() {
        let spec = CrontabSpec {
            minute: "0".into(),
            hour: "*/1".into(),
            day_of_week: "mon".into(),
            day_of_month: String::new(),
            month_of_year: "*".into(),
        };
        assert_eq!(spec.expression(), "0 */1 * * mon");
    }

    #[test]
    fn test_validate_rejects_bad_definitions() {
        let mut def = definition(ScheduleKind::Interval);
        assert!(def.validate().is_ok());

        def.interval.minutes = Some(0);
        assert!(def.validate().is_err());

        let mut def = definition(ScheduleKind::Crontab);
        def.crontab.minute = "61".into();
        assert!(def.validate().is_err());

        let mut def = definition(ScheduleKind::Interval);
        def.task = "surge.tasks.unknown".into();
        assert!(def.validate().is_err());

        let def = definition(ScheduleKind::Unspecified);
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_schedule_kind_round_trip_through_column() {
        assert_eq!(ScheduleKind::from_db("crontab"), ScheduleKind::Crontab);
        assert_eq!(ScheduleKind::from_db("interval"), ScheduleKind::Interval);
        assert_eq!(ScheduleKind::from_db("solar"), ScheduleKind::Unspecified);
    }
}
