//! Cron expression handling for recurring triggers.
//!
//! Schedules are stored as written and evaluated with `croner` in their
//! seconds-first form. Before that, each cron field is range-checked so a
//! bad job definition names the field at fault, and the shorthand forms
//! ("every 15 minutes", "weekdays at 02:00") are expanded only when they
//! produce an evenly spaced schedule.

use std::fmt;

use assayer_types::error::ConfigurationError;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A field of a seconds-first cron expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronField {
    Second,
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl CronField {
    const ALL: [CronField; 6] = [
        CronField::Second,
        CronField::Minute,
        CronField::Hour,
        CronField::DayOfMonth,
        CronField::Month,
        CronField::DayOfWeek,
    ];

    /// Inclusive numeric bounds. Day-of-week accepts both 0 and 7 for Sunday.
    fn bounds(self) -> (u32, u32) {
        match self {
            CronField::Second | CronField::Minute => (0, 59),
            CronField::Hour => (0, 23),
            CronField::DayOfMonth => (1, 31),
            CronField::Month => (1, 12),
            CronField::DayOfWeek => (0, 7),
        }
    }

    fn names(self) -> &'static [&'static str] {
        match self {
            CronField::Month => &[
                "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
            ],
            CronField::DayOfWeek => &["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
            _ => &[],
        }
    }

    /// `L`, `W` and `#` modifiers are left to croner.
    fn allows_modifiers(self) -> bool {
        matches!(self, CronField::DayOfMonth | CronField::DayOfWeek)
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CronField::Second => "second",
            CronField::Minute => "minute",
            CronField::Hour => "hour",
            CronField::DayOfMonth => "day-of-month",
            CronField::Month => "month",
            CronField::DayOfWeek => "day-of-week",
        })
    }
}

/// Errors from schedule parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("expected 5 or 6 cron fields, found {0}")]
    FieldCount(usize),

    #[error("{field} field '{value}': {reason}")]
    Field {
        field: CronField,
        value: String,
        reason: String,
    },

    #[error("every {step} {unit}s does not divide a {cycle}-{unit} cycle evenly; use an interval trigger")]
    UnevenStep {
        step: u32,
        unit: &'static str,
        cycle: u32,
    },

    #[error("interval must be positive")]
    ZeroInterval,

    #[error("invalid time of day '{0}', expected HH:MM")]
    TimeOfDay(String),

    #[error("unrecognized schedule '{0}'")]
    Unrecognized(String),

    #[error("{0}")]
    Cron(String),
}

impl ScheduleError {
    pub fn into_configuration_error(self, expression: &str) -> ConfigurationError {
        ConfigurationError::InvalidSchedule {
            expression: expression.to_string(),
            reason: self.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Shorthands with a fixed expansion.
const ALIASES: &[(&str, &str)] = &[
    ("every minute", "0 * * * * *"),
    ("minutely", "0 * * * * *"),
    ("every hour", "0 0 * * * *"),
    ("hourly", "0 0 * * * *"),
    ("@hourly", "0 0 * * * *"),
    ("every day", "0 0 0 * * *"),
    ("daily", "0 0 0 * * *"),
    ("@daily", "0 0 0 * * *"),
    ("@midnight", "0 0 0 * * *"),
    ("every week", "0 0 0 * * 0"),
    ("weekly", "0 0 0 * * 0"),
    ("@weekly", "0 0 0 * * 0"),
];

/// Normalize a schedule string to a 6-field (seconds-first) cron expression.
///
/// Accepted forms (case-insensitive for shorthands):
/// - 5-field cron (a `0` seconds field is prepended) or 6-field cron
/// - the fixed shorthands in `ALIASES`
/// - `every N seconds|minutes|hours`, where N divides 60, 60 or 24
/// - `every day at HH:MM`, `weekdays at HH:MM`
pub fn normalize_schedule(input: &str) -> Result<String, ScheduleError> {
    let trimmed = input.trim();
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    let Some(first) = fields.first() else {
        return Err(ScheduleError::Unrecognized(String::new()));
    };

    if first.starts_with(|c: char| c.is_ascii_digit() || c == '*' || c == '?') {
        let fields: Vec<&str> = match fields.len() {
            5 => std::iter::once("0").chain(fields.iter().copied()).collect(),
            6 => fields,
            n => return Err(ScheduleError::FieldCount(n)),
        };
        for (field, value) in CronField::ALL.into_iter().zip(&fields) {
            check_field(field, value)?;
        }
        return Ok(fields.join(" "));
    }

    let lower = fields.join(" ").to_lowercase();
    if let Some((_, expr)) = ALIASES.iter().find(|(alias, _)| *alias == lower) {
        return Ok((*expr).to_string());
    }
    if let Some(at) = lower.strip_prefix("every day at ") {
        let (hour, minute) = time_of_day(at)?;
        return Ok(format!("0 {minute} {hour} * * *"));
    }
    if let Some(at) = lower.strip_prefix("weekdays at ") {
        let (hour, minute) = time_of_day(at)?;
        return Ok(format!("0 {minute} {hour} * * 1-5"));
    }
    if let Some(rest) = lower.strip_prefix("every ") {
        if let [count, unit] = rest.split_whitespace().collect::<Vec<_>>()[..] {
            if let Ok(step) = count.parse::<u32>() {
                if let Some(expanded) = every(step, unit) {
                    return expanded;
                }
            }
        }
    }

    Err(ScheduleError::Unrecognized(trimmed.to_string()))
}

/// Expand `every <step> <unit>`. `None` for an unknown unit.
fn every(step: u32, unit: &str) -> Option<Result<String, ScheduleError>> {
    let (unit, cycle): (&'static str, u32) = match unit.trim_end_matches('s') {
        "second" => ("second", 60),
        "minute" => ("minute", 60),
        "hour" => ("hour", 24),
        _ => return None,
    };
    if step == 0 {
        return Some(Err(ScheduleError::ZeroInterval));
    }
    if cycle % step != 0 {
        return Some(Err(ScheduleError::UnevenStep { step, unit, cycle }));
    }
    Some(Ok(match unit {
        "second" => format!("*/{step} * * * * *"),
        "minute" => format!("0 */{step} * * * *"),
        _ => format!("0 0 */{step} * * *"),
    }))
}

fn time_of_day(text: &str) -> Result<(u32, u32), ScheduleError> {
    let invalid = || ScheduleError::TimeOfDay(text.to_string());
    let (hour, minute) = text.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
    let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

/// Range-check one cron field: comma lists of `*`, `?`, values, ranges and
/// `/step` suffixes.
fn check_field(field: CronField, value: &str) -> Result<(), ScheduleError> {
    let (min, max) = field.bounds();
    let fail = |reason: String| ScheduleError::Field {
        field,
        value: value.to_string(),
        reason,
    };

    for item in value.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };
        if let Some(step) = step {
            let step: u32 = step
                .parse()
                .map_err(|_| fail(format!("step '{step}' is not a number")))?;
            if step == 0 || step > max {
                return Err(fail(format!("step {step} outside 1-{max}")));
            }
        }
        if base == "*" || base == "?" {
            continue;
        }
        if field.allows_modifiers() && base.contains(['L', 'W', '#']) {
            continue;
        }
        for bound in base.split('-') {
            if let Ok(n) = bound.parse::<u32>() {
                if n < min || n > max {
                    return Err(fail(format!("{n} outside {min}-{max}")));
                }
            } else if !field.names().contains(&bound.to_ascii_lowercase().as_str()) {
                return Err(fail(format!("'{bound}' is not a valid {field}")));
            }
        }
    }
    Ok(())
}

/// Normalize and parse a schedule string.
pub fn parse_schedule(input: &str) -> Result<croner::Cron, ScheduleError> {
    let expr = normalize_schedule(input)?;
    expr.parse::<croner::Cron>()
        .map_err(|e| ScheduleError::Cron(e.to_string()))
}

/// Check that a schedule parses, for job creation.
pub fn validate_schedule(input: &str) -> Result<(), ConfigurationError> {
    parse_schedule(input)
        .map(|_| ())
        .map_err(|e| e.into_configuration_error(input))
}

// ---------------------------------------------------------------------------
// Occurrences
// ---------------------------------------------------------------------------

/// The first occurrence in the half-open window `(since, now]`, if any.
pub fn occurrence_in_window(
    cron: &croner::Cron,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    cron.iter_after(since).next().filter(|next| *next <= now)
}

/// The next occurrence strictly after `after`.
pub fn next_occurrence(cron: &croner::Cron, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    cron.iter_after(after).next()
}

/// Cron occurrences a job missed while the process was down.
#[derive(Debug, Clone, PartialEq)]
pub struct MissedRuns {
    pub job_id: Uuid,
    pub occurrences: Vec<DateTime<Utc>>,
}

/// Check for cron occurrences between each job's last scheduled run and `now`.
///
/// Jobs without a baseline or with an unparseable schedule are skipped.
/// Missed runs are reported, not replayed.
pub fn check_missed_runs(
    schedules: &[(Uuid, String, Option<DateTime<Utc>>)],
    now: DateTime<Utc>,
) -> Vec<MissedRuns> {
    let mut missed = Vec::new();

    for (job_id, schedule, last_fired) in schedules {
        let Some(from) = last_fired else {
            continue;
        };
        let Ok(cron) = parse_schedule(schedule) else {
            continue;
        };

        let occurrences: Vec<DateTime<Utc>> = cron
            .iter_after(*from)
            .take_while(|next| *next < now)
            .collect();

        if !occurrences.is_empty() {
            tracing::warn!(
                %job_id,
                count = occurrences.len(),
                "detected missed cron runs"
            );
            missed.push(MissedRuns {
                job_id: *job_id,
                occurrences,
            });
        }
    }

    missed
}
