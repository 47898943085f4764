//! Validated 5-field cron expressions.
//!
//! Expressions use the standard `minute hour day-of-month month day-of-week`
//! layout. Internally they are evaluated by the `cron` crate, which expects a
//! leading seconds field and numbers weekdays from 1 (Sunday); numeric
//! weekdays are therefore rewritten to names before handing them over.
//!
//! When both day-of-month and day-of-week are restricted, a time matches if
//! either field matches. The `cron` crate requires both, so such
//! expressions are split into one schedule per day field.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone};
use cron::Schedule;

use crate::{Error, Result};

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A parsed cron expression.
#[derive(Clone)]
pub struct CronExpr {
    normalized: String,
    /// One schedule, or two whose fires are merged.
    schedules: Vec<Schedule>,
}

impl CronExpr {
    /// Parse a standard 5-field expression or one of the `@yearly`,
    /// `@monthly`, `@weekly`, `@daily`, `@hourly` shorthands.
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidCron {
            expr: expr.to_string(),
            reason,
        };

        let trimmed = expr.trim();
        let expanded = match trimmed {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        }

        let weekday = weekday_field(fields[4]).map_err(invalid)?;
        let day_fields = if is_restricted(fields[2]) && is_restricted(fields[4]) {
            vec![(fields[2], "*".to_string()), ("*", weekday)]
        } else {
            vec![(fields[2], weekday)]
        };

        let schedules = day_fields
            .into_iter()
            .map(|(month_day, week_day)| {
                let engine_expr = format!(
                    "0 {} {} {} {} {}",
                    fields[0], fields[1], month_day, fields[3], week_day
                );
                Schedule::from_str(&engine_expr).map_err(|e| invalid(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            normalized: fields.join(" "),
            schedules,
        })
    }

    /// The first fire strictly after `after`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(after).next())
            .min()
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }
}

/// Whether a day field narrows the days, as opposed to `*`, `*/n` or `?`.
fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field == "?")
}

/// Rewrite a day-of-week field into weekday names.
///
/// Accepts `*`, `?`, numbers 0-7 (0 and 7 are Sunday), names, ranges,
/// lists and steps.
fn weekday_field(field: &str) -> std::result::Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = [false; 7];
    for part in field.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((base, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("invalid step {step:?} in day-of-week"))?;
                if step == 0 {
                    return Err("day-of-week step must be positive".to_string());
                }
                (base, step)
            }
            None => (part, 1),
        };

        let (start, end) = if base == "*" {
            (0, 6)
        } else if let Some((a, b)) = base.split_once('-') {
            (weekday_value(a)?, weekday_value(b)?)
        } else {
            let day = weekday_value(base)?;
            (day, if step > 1 { 6 } else { day })
        };
        if start > end {
            return Err(format!("day-of-week range {base:?} is reversed"));
        }

        for day in (start..=end).step_by(step) {
            days[day % 7] = true;
        }
    }

    Ok(days
        .iter()
        .enumerate()
        .filter(|(_, set)| **set)
        .map(|(i, _)| WEEKDAYS[i])
        .collect::<Vec<_>>()
        .join(","))
}

/// Position of a weekday token: 0-6 for Sunday-Saturday, 7 for a trailing
/// Sunday in ranges such as `5-7`.
fn weekday_value(token: &str) -> std::result::Result<usize, String> {
    if let Ok(n) = token.parse::<usize>() {
        return if n <= 7 {
            Ok(n)
        } else {
            Err(format!("day-of-week {n} out of range 0-7"))
        };
    }
    WEEKDAYS
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
        .ok_or_else(|| format!("unknown day-of-week {token:?}"))
}

impl FromStr for CronExpr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

impl fmt::Debug for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpr").field(&self.normalized).finish()
    }
}

impl PartialEq for CronExpr {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for CronExpr {}
