//! Built-in schedule table and the seeding routine that copies it into the
//! schedule store.

use std::time::Duration;

use crate::database::ScheduleStore;
use crate::error::StoreResult;

use super::{CrontabSpec, FETCH_SURGE_ALERTS_TASK, IntervalSpec, NewScheduledTask, ScheduleKind};

/// Timing of a built-in schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultTiming {
    Every(Duration),
    Crontab(CrontabSpec),
}

/// One entry of the built-in schedule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultSchedule {
    /// Slug key, e.g. `fetch-surge-alerts-every-hour`.
    pub key: String,
    pub task: String,
    pub timing: DefaultTiming,
}

impl DefaultSchedule {
    /// Name the seeded row gets: dashes become spaces and every word is
    /// capitalised.
    pub fn display_name(&self) -> String {
        title_case(&self.key.replace('-', " "))
    }

    fn definition(&self) -> NewScheduledTask {
        let (schedule_type, interval, crontab) = match &self.timing {
            DefaultTiming::Every(period) => (
                ScheduleKind::Interval,
                IntervalSpec::from_duration(*period),
                CrontabSpec::default(),
            ),
            DefaultTiming::Crontab(spec) => {
                (ScheduleKind::Crontab, IntervalSpec::default(), spec.truncated())
            }
        };
        NewScheduledTask {
            name: self.display_name(),
            task: self.task.clone(),
            enabled: true,
            schedule_type,
            interval,
            crontab,
        }
    }
}

/// Capitalise the first letter of each alphabetic run and lowercase the rest.
fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut previous_alpha = false;
    for c in input.chars() {
        if c.is_alphabetic() {
            if previous_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_alpha = true;
        } else {
            out.push(c);
            previous_alpha = false;
        }
    }
    out
}

/// The static schedule table used when the store has no matching row.
pub fn default_beat_schedule() -> Vec<DefaultSchedule> {
    vec![DefaultSchedule {
        key: "fetch-surge-alerts-every-hour".to_string(),
        task: FETCH_SURGE_ALERTS_TASK.to_string(),
        timing: DefaultTiming::Crontab(CrontabSpec {
            minute: "0".to_string(),
            hour: "*/1".to_string(),
            ..CrontabSpec::default()
        }),
    }]
}

/// Outcome of [`init_scheduler`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Names of rows that were inserted.
    pub created: Vec<String>,
    /// Names that already existed.
    pub skipped: Vec<String>,
}

/// Insert a row for every default whose display name is not yet taken.
pub async fn init_scheduler(
    store: &dyn ScheduleStore,
    defaults: &[DefaultSchedule],
) -> StoreResult<SeedReport> {
    let mut report = SeedReport::default();

    for default in defaults {
        let name = default.display_name();
        if store.find_task_by_name(&name).await?.is_some() {
            tracing::info!(schedule = %name, "Schedule already exists, skipping");
            report.skipped.push(name);
            continue;
        }

        let created = store.create_task(default.definition()).await?;
        tracing::info!(
            schedule = %created.name,
            task = %created.task,
            display = %created.schedule_display(),
            "Seeded schedule"
        );
        report.created.push(name);
    }

    Ok(report)
}
