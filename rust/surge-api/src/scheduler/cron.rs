//! Cron expression parsing and evaluation.
//!
//! Supports the standard five fields (`minute hour day month weekday`).
//! Every field accepts `*`, a single value, a range `a-b`, a step `*/n`,
//! `a-b/n` or `a/n`, and comma separated lists of any of those. Weekdays
//! accept `0-7` (both 0 and 7 are Sunday) and `sun..sat`; months accept
//! `1-12` and `jan..dec`. Day-of-month and day-of-week must both match.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];
const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// How far ahead [`CronExpression::next_after`] searches before giving up.
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    weekday: CronField,
}

/// Allowed values of one field as a bitmask (all ranges fit in 64 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CronField(u64);

impl CronField {
    fn matches(self, value: u32) -> bool {
        value < 64 && self.0 & (1u64 << value) != 0
    }
}

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Minute,
    Hour,
    Day,
    Month,
    Weekday,
}

impl FieldKind {
    fn bounds(self) -> (u32, u32) {
        match self {
            Self::Minute => (0, 59),
            Self::Hour => (0, 23),
            Self::Day => (1, 31),
            Self::Month => (1, 12),
            Self::Weekday => (0, 7),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day of month",
            Self::Month => "month",
            Self::Weekday => "day of week",
        }
    }

    fn value(self, token: &str) -> Result<u32> {
        let token = token.trim();
        if let Ok(value) = token.parse::<u32>() {
            return Ok(value);
        }

        let names: &[&str] = match self {
            Self::Weekday => &WEEKDAY_NAMES,
            Self::Month => &MONTH_NAMES,
            _ => bail!("Invalid numeric value: {token}"),
        };
        let lowered = token.to_ascii_lowercase();
        let position = lowered
            .get(..3)
            .and_then(|prefix| names.iter().position(|name| *name == prefix))
            .with_context(|| format!("Unknown name: {token}"))?;
        let position = u32::try_from(position)?;
        Ok(match self {
            Self::Month => position + 1,
            _ => position,
        })
    }
}

/// Cron expression parser.
#[derive(Debug)]
pub struct CronParser;

impl CronParser {
    /// Parse a cron expression string.
    ///
    /// # Format
    ///
    /// Standard cron format: `minute hour day month weekday`
    ///
    /// # Examples
    ///
    /// - `0 0 * * *` - Daily at midnight
    /// - `*/5 * * * *` - Every 5 minutes
    /// - `0 9-17 * * mon-fri` - Every hour 9am-5pm, Monday-Friday
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is invalid.
    pub fn parse(expr: &str) -> Result<CronExpression> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            bail!("Cron expression must have 5 fields: {expr}");
        }
        Self::from_fields(parts[0], parts[1], parts[4], parts[2], parts[3])
    }

    /// Build an expression from separately stored fields, in the order the
    /// schedule table keeps them.
    pub fn from_fields(
        minute: &str,
        hour: &str,
        day_of_week: &str,
        day_of_month: &str,
        month_of_year: &str,
    ) -> Result<CronExpression> {
        Ok(CronExpression {
            minute: Self::parse_field(minute, FieldKind::Minute)?,
            hour: Self::parse_field(hour, FieldKind::Hour)?,
            day: Self::parse_field(day_of_month, FieldKind::Day)?,
            month: Self::parse_field(month_of_year, FieldKind::Month)?,
            weekday: Self::parse_field(day_of_week, FieldKind::Weekday)?,
        })
    }

    fn parse_field(field: &str, kind: FieldKind) -> Result<CronField> {
        let (min, max) = kind.bounds();
        let mut mask = 0u64;

        for part in field.split(',') {
            let part = part.trim();
            if part.is_empty() {
                bail!("Invalid {} field: {field}", kind.label());
            }

            let (base, step) = match part.split_once('/') {
                Some((base, step)) => {
                    let step: u32 = step
                        .trim()
                        .parse()
                        .with_context(|| format!("Invalid step in {} field: {part}", kind.label()))?;
                    if step == 0 {
                        bail!("Step must be positive in {} field: {part}", kind.label());
                    }
                    (base.trim(), Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if base == "*" {
                (min, max)
            } else if let Some((a, b)) = base.split_once('-') {
                (kind.value(a)?, kind.value(b)?)
            } else {
                let value = kind.value(base)?;
                // `a/n` runs from a to the end of the range
                if step.is_some() { (value, max) } else { (value, value) }
            };

            if start < min || end > max || start > end {
                bail!(
                    "{} values must be {min}-{max} with start <= end: {part}",
                    kind.label()
                );
            }

            let step = step.unwrap_or(1) as usize;
            for value in (start..=end).step_by(step) {
                mask |= 1u64 << value;
            }
        }

        if let FieldKind::Weekday = kind {
            // 7 is an alias for Sunday
            if mask & (1 << 7) != 0 {
                mask = (mask & !(1 << 7)) | 1;
            }
        }

        Ok(CronField(mask))
    }
}

impl CronExpression {
    /// Check if the cron expression matches the given time (to the minute).
    pub fn matches(&self, time: &DateTime<Utc>) -> bool {
        self.minute.matches(time.minute())
            && self.hour.matches(time.hour())
            && self.matches_date(time)
    }

    fn matches_date(&self, time: &DateTime<Utc>) -> bool {
        self.day.matches(time.day())
            && self.month.matches(time.month())
            && self.weekday.matches(time.weekday().num_days_from_sunday())
    }

    /// The first matching minute boundary strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut current = truncate_to_minute(after) + Duration::minutes(1);
        let horizon = *after + Duration::days(SEARCH_HORIZON_DAYS);

        while current <= horizon {
            if !self.month.matches(current.month()) {
                current = start_of_next_month(&current)?;
                continue;
            }
            if !self.matches_date(&current) {
                current = start_of_day(&current)? + Duration::days(1);
                continue;
            }
            if !self.hour.matches(current.hour()) {
                current = truncate_to_hour(&current) + Duration::hours(1);
                continue;
            }
            if !self.minute.matches(current.minute()) {
                current += Duration::minutes(1);
                continue;
            }
            return Some(current);
        }
        None
    }
}

/// Drop seconds and sub-seconds.
pub fn truncate_to_minute(time: &DateTime<Utc>) -> DateTime<Utc> {
    *time - Duration::seconds(i64::from(time.second())) - Duration::nanoseconds(i64::from(time.nanosecond()))
}

fn truncate_to_hour(time: &DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_minute(time) - Duration::minutes(i64::from(time.minute()))
}

fn start_of_day(time: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let naive = time.date_naive().and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

fn start_of_next_month(time: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if time.month() == 12 {
        (time.year() + 1, 1)
    } else {
        (time.year(), time.month() + 1)
    };
    let naive = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}
