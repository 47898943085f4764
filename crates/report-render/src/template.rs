//! Text templates.
//!
//! Templates use Jinja syntax. Missing fields render as empty text instead
//! of failing, so `{{ report.card.missing }}` on sparse data is harmless.
//!
//! Every helper is registered both as a function and as a filter:
//!
//! | helper | example |
//! |--------|---------|
//! | `upper`, `lower` | `{{ title \| upper }}` |
//! | `addDays`, `subDays` | `{{ addDays(now(), -1) }}` |
//! | `diffDays` | `{{ diffDays(start, end) }}` |
//! | `addDuration` | `{{ now() \| addDuration("-1h30m") }}` |
//! | `date` | `{{ now() \| date("02.01.2006") }}` or strftime `"%d.%m.%Y"` |
//! | `escape` | MarkdownV2 escaping |
//! | `toJson` | compact JSON |
//! | `now`, `today` | current time / date |

use std::fmt::Write;

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, SecondsFormat};
use minijinja::{Environment, Error, ErrorKind, UndefinedBehavior, Value};
use serde::Serialize;

use crate::error::Result;

/// Shared template environment with report helpers installed.
#[derive(Debug)]
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);

        macro_rules! helper {
            ($name:literal, $f:expr) => {
                env.add_function($name, $f);
                env.add_filter($name, $f);
            };
        }
        helper!("upper", upper);
        helper!("lower", lower);
        helper!("addDays", add_days);
        helper!("subDays", sub_days);
        helper!("diffDays", diff_days);
        helper!("addDuration", add_duration);
        helper!("date", format_date);
        helper!("escape", escape_value);
        helper!("toJson", to_json);
        env.add_function("now", now);
        env.add_function("today", today);

        Self { env }
    }

    /// Render `source` against `ctx`.
    pub fn render<S: Serialize>(&self, source: &str, ctx: S) -> Result<String> {
        Ok(self.env.render_str(source, ctx)?)
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, msg.into())
}

fn value_text(value: &Value) -> String {
    if value.is_undefined() || value.is_none() {
        String::new()
    } else if let Some(s) = value.as_str() {
        s.to_string()
    } else {
        value.to_string()
    }
}

fn upper(value: Value) -> String {
    value_text(&value).to_uppercase()
}

fn lower(value: Value) -> String {
    value_text(&value).to_lowercase()
}

fn local_midnight(date: NaiveDate) -> Option<DateTime<FixedOffset>> {
    date.and_hms_opt(0, 0, 0)
        .and_then(|ts| ts.and_local_timezone(Local).earliest())
        .map(|ts| ts.fixed_offset())
}

/// Parse a template value as a point in time.
///
/// Accepts RFC 3339 text, `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD` in local
/// time, or integer Unix seconds.
pub fn parse_time(value: &Value) -> std::result::Result<DateTime<FixedOffset>, Error> {
    if let Ok(secs) = i64::try_from(value.clone()) {
        return DateTime::from_timestamp(secs, 0)
            .map(|ts| ts.fixed_offset())
            .ok_or_else(|| invalid(format!("timestamp out of range: {secs}")));
    }

    let text = value_text(value);
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        && let Some(local) = ts.and_local_timezone(Local).earliest()
    {
        return Ok(local.fixed_offset());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        && let Some(ts) = local_midnight(date)
    {
        return Ok(ts);
    }
    Err(invalid(format!("cannot parse time from {text:?}")))
}

fn format_time(ts: DateTime<FixedOffset>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn shift(ts: DateTime<FixedOffset>, delta: Duration) -> std::result::Result<String, Error> {
    ts.checked_add_signed(delta)
        .map(format_time)
        .ok_or_else(|| invalid("time arithmetic overflow"))
}

fn add_days(t: Value, days: i64) -> std::result::Result<String, Error> {
    let delta = Duration::try_days(days).ok_or_else(|| invalid("day offset out of range"))?;
    shift(parse_time(&t)?, delta)
}

fn sub_days(t: Value, days: i64) -> std::result::Result<String, Error> {
    add_days(t, -days)
}

/// Whole days from `a` to `b`.
fn diff_days(a: Value, b: Value) -> std::result::Result<i64, Error> {
    Ok((parse_time(&b)? - parse_time(&a)?).num_days())
}

/// Shift by a humantime duration such as `90m` or `-1h30m`.
fn add_duration(t: Value, duration: String) -> std::result::Result<String, Error> {
    let spec = duration.trim();
    let (negative, spec) = match spec.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, spec.strip_prefix('+').unwrap_or(spec)),
    };
    let std = humantime::parse_duration(spec)
        .map_err(|e| invalid(format!("invalid duration {duration:?}: {e}")))?;
    let delta = Duration::from_std(std).map_err(|_| invalid("duration out of range"))?;
    shift(parse_time(&t)?, if negative { -delta } else { delta })
}

const GO_LAYOUT_TOKENS: &[(&str, &str)] = &[
    ("January", "%B"),
    ("Monday", "%A"),
    ("2006", "%Y"),
    ("Z07:00", "%:z"),
    ("-07:00", "%:z"),
    ("-0700", "%z"),
    (".000000000", "%.9f"),
    (".000000", "%.6f"),
    (".000", "%.3f"),
    ("Jan", "%b"),
    ("Mon", "%a"),
    ("MST", "%Z"),
    ("_2", "%e"),
    ("15", "%H"),
    ("06", "%y"),
    ("01", "%m"),
    ("02", "%d"),
    ("03", "%I"),
    ("04", "%M"),
    ("05", "%S"),
    ("PM", "%p"),
];

/// Translate a reference-time layout (`02.01.2006 15:04`) to strftime.
/// Layouts already containing `%` are returned unchanged.
pub fn layout_to_strftime(layout: &str) -> String {
    if layout.contains('%') {
        return layout.to_string();
    }
    let mut out = String::with_capacity(layout.len() * 2);
    let mut rest = layout;
    'scan: while let Some(c) = rest.chars().next() {
        for (token, spec) in GO_LAYOUT_TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(spec);
                rest = tail;
                continue 'scan;
            }
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

fn format_date(t: Value, layout: Option<String>) -> std::result::Result<String, Error> {
    let ts = parse_time(&t)?;
    let fmt = layout_to_strftime(layout.as_deref().unwrap_or("2006-01-02"));
    let mut out = String::new();
    write!(out, "{}", ts.format(&fmt)).map_err(|_| invalid(format!("invalid date layout {fmt:?}")))?;
    Ok(out)
}

const MARKDOWN_V2_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

/// Escape text for Telegram MarkdownV2 by prefixing each special character
/// with a backslash. Backslashes themselves pass through unchanged.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if MARKDOWN_V2_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_value(value: Value) -> String {
    escape_markdown_v2(&value_text(&value))
}

fn to_json(value: Value) -> std::result::Result<String, Error> {
    serde_json::to_string(&value).map_err(|e| invalid(format!("cannot encode JSON: {e}")))
}

fn now() -> String {
    format_time(Local::now().fixed_offset())
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}
