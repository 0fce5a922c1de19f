//! Due-time evaluation for a single schedule.

use chrono::{DateTime, Duration, Utc};

use super::cron::{CronExpression, truncate_to_minute};
use super::defaults::{DefaultSchedule, DefaultTiming};
use super::{ScheduleKind, ScheduledTask};

/// Seconds until a disabled entry is looked at again.
pub const DISABLED_RECHECK_SECS: f64 = 60.0;

/// Period used when a schedule has no usable timing.
pub const DEFAULT_INTERVAL_SECS: i64 = 3_600;

/// Result of evaluating an entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DueCheck {
    /// Whether the task should be dispatched now.
    pub is_due: bool,
    /// Seconds until the entry should be evaluated again.
    pub next_check_secs: f64,
}

impl DueCheck {
    fn due(next_check_secs: f64) -> Self {
        Self {
            is_due: true,
            next_check_secs,
        }
    }

    fn wait(next_check_secs: f64) -> Self {
        Self {
            is_due: false,
            next_check_secs,
        }
    }
}

/// Concrete timing of an entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    /// Fixed period.
    Every(Duration),
    /// Cron pattern.
    Cron(CronExpression),
}

impl Default for Schedule {
    fn default() -> Self {
        Self::Every(Duration::seconds(DEFAULT_INTERVAL_SECS))
    }
}

impl Schedule {
    /// Compute the schedule a stored definition asks for.
    ///
    /// Unknown kinds, all-zero intervals and unparseable crontabs fall back
    /// to one hour.
    pub fn for_task(task: &ScheduledTask) -> Self {
        match task.schedule_type {
            ScheduleKind::Interval => Self::every_secs(task.interval.total_seconds()),
            ScheduleKind::Crontab => match task.crontab.parse() {
                Ok(expr) => Self::Cron(expr),
                Err(e) => {
                    tracing::warn!(
                        schedule = %task.name,
                        crontab = %task.crontab.expression(),
                        error = %e,
                        "Invalid crontab, falling back to hourly"
                    );
                    Self::default()
                }
            },
            ScheduleKind::Unspecified => Self::default(),
        }
    }

    fn every_secs(secs: u64) -> Self {
        match i64::try_from(secs) {
            Ok(secs) if secs > 0 => Self::Every(Duration::seconds(secs)),
            _ => Self::default(),
        }
    }

    /// Evaluate against the last run time.
    pub fn is_due(&self, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DueCheck {
        match self {
            Self::Every(period) => {
                let period_secs = as_secs_f64(*period);
                let Some(last) = last_run_at else {
                    return DueCheck::due(period_secs);
                };
                let remaining = *period - (now - last);
                if remaining <= Duration::zero() {
                    DueCheck::due(period_secs)
                } else {
                    DueCheck::wait(as_secs_f64(remaining))
                }
            }
            Self::Cron(expr) => {
                let is_due = match last_run_at {
                    None => expr.matches(&now),
                    Some(last) => expr.next_after(&last).is_some_and(|next| next <= now),
                };
                let next_check_secs = expr
                    .next_after(&now)
                    .map_or(DEFAULT_INTERVAL_SECS as f64, |next| as_secs_f64(next - now));
                DueCheck {
                    is_due,
                    next_check_secs,
                }
            }
        }
    }
}

fn as_secs_f64(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1_000.0
}

/// Where an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    /// A row in `scheduled_tasks`. Runs are persisted.
    Store,
    /// The built-in default table. Runs live in memory only.
    Fallback,
}

/// In-memory view of one schedule. Dispatch replaces it with a new snapshot
/// instead of mutating it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub name: String,
    pub task: String,
    pub enabled: bool,
    pub schedule: Schedule,
    pub last_run_at: Option<DateTime<Utc>>,
    pub total_run_count: u64,
    pub origin: EntryOrigin,
    /// Row id for store-backed entries.
    pub store_id: Option<i64>,
}

impl ScheduleEntry {
    /// Build an entry from a stored definition.
    pub fn from_task(task: &ScheduledTask) -> Self {
        Self {
            name: task.name.clone(),
            task: task.task.clone(),
            enabled: task.enabled,
            schedule: Schedule::for_task(task),
            last_run_at: task.last_run_at,
            total_run_count: task.total_run_count,
            origin: EntryOrigin::Store,
            store_id: Some(task.id),
        }
    }

    /// Build an entry from a built-in default.
    pub fn fallback(default: &DefaultSchedule) -> Self {
        let schedule = match &default.timing {
            DefaultTiming::Every(period) => Schedule::every_secs(period.as_secs()),
            DefaultTiming::Crontab(spec) => match spec.parse() {
                Ok(expr) => Schedule::Cron(expr),
                Err(e) => {
                    tracing::warn!(schedule = %default.key, error = %e, "Invalid default crontab");
                    Schedule::default()
                }
            },
        };
        Self {
            name: default.key.clone(),
            task: default.task.clone(),
            enabled: true,
            schedule,
            last_run_at: None,
            total_run_count: 0,
            origin: EntryOrigin::Fallback,
            store_id: None,
        }
    }

    /// Evaluate the entry. Disabled entries are never due.
    pub fn is_due(&self, now: DateTime<Utc>) -> DueCheck {
        if !self.enabled {
            return DueCheck::wait(DISABLED_RECHECK_SECS);
        }
        self.schedule.is_due(self.last_run_at, now)
    }

    /// Snapshot after a dispatch at `now`.
    #[must_use]
    pub fn advanced(&self, now: DateTime<Utc>) -> Self {
        let last_run_at = match self.schedule {
            // cron runs are pinned to the minute boundary they fired for
            Schedule::Cron(_) => truncate_to_minute(&now),
            Schedule::Every(_) => now,
        };
        Self {
            last_run_at: Some(last_run_at),
            total_run_count: self.total_run_count + 1,
            ..self.clone()
        }
    }
}
