//! Report join rows and hydration into [`Report`] aggregates.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{
    Card, ColumnOrder, EmailRecipient, ExportFormat, ExportSpec, Recipient, Report,
};
use crate::{Error, Result};

/// One row of the report hydration join.
///
/// The join multiplies cards, recipients and exports; hydration groups them
/// back by their keys.
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
pub struct ReportJoinRow {
    pub report_name: String,
    pub report_title: String,
    pub group_id: Option<i64>,
    pub evaluation: String,
    pub active: bool,

    pub card_uuid: Option<String>,
    pub card_title: Option<String>,
    pub card_position: Option<i64>,

    pub recipient_id: Option<i64>,
    pub recipient_kind: Option<String>,
    pub recipient_position: Option<i64>,
    pub chat_id: Option<i64>,
    pub thread_id: Option<i64>,
    pub remote_path: Option<String>,
    pub email_to: Option<String>,
    pub email_cc: Option<String>,
    pub subject_template: Option<String>,
    pub body_template: Option<String>,

    pub export_id: Option<i64>,
    pub export_position: Option<i64>,
    pub export_format: Option<String>,
    pub template_body: Option<String>,
    pub filename_template: Option<String>,
    pub column_order: Option<String>,
}

/// Decode the `{a,b,c}` text array encoding.
///
/// Elements may be double-quoted to carry commas, braces or spaces; inside
/// quotes a backslash escapes the next character. Unquoted elements are
/// trimmed. Input without braces is read as a bare comma-separated list.
pub fn decode_text_array(raw: &str) -> std::result::Result<Vec<String>, String> {
    let raw = raw.trim();
    let inner = match (raw.strip_prefix('{'), raw.ends_with('}')) {
        (Some(rest), true) => &rest[..rest.len() - 1],
        (None, false) => raw,
        _ => return Err(format!("unbalanced braces in array {raw:?}")),
    };
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut items = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                was_quoted = true;
            }
            '\\' if quoted => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => return Err(format!("dangling escape in array {raw:?}")),
            },
            ',' if !quoted => {
                items.push(finish_element(&mut current, was_quoted));
                was_quoted = false;
            }
            other => current.push(other),
        }
    }
    if quoted {
        return Err(format!("unterminated quote in array {raw:?}"));
    }
    items.push(finish_element(&mut current, was_quoted));
    Ok(items)
}

fn finish_element(current: &mut String, was_quoted: bool) -> String {
    let element = std::mem::take(current);
    if was_quoted {
        element
    } else {
        element.trim().to_string()
    }
}

/// Decode the JSON column-order map. Missing or blank means no order.
pub fn decode_column_order(raw: Option<&str>) -> std::result::Result<ColumnOrder, serde_json::Error> {
    match raw.map(str::trim) {
        None | Some("") | Some("null") => Ok(ColumnOrder::new()),
        Some(json) => serde_json::from_str(json),
    }
}

fn decode_recipient(row: &ReportJoinRow) -> Result<Recipient> {
    let report = row.report_name.as_str();
    let kind = row.recipient_kind.as_deref().unwrap_or_default();

    match kind {
        "telegram" => {
            let chat_id = row
                .chat_id
                .ok_or_else(|| Error::malformed(report, "telegram recipient without chat_id"))?;
            let thread_id = row
                .thread_id
                .map(i32::try_from)
                .transpose()
                .map_err(|_| Error::malformed(report, "thread_id out of range"))?;
            Ok(Recipient::TelegramChat { chat_id, thread_id })
        }
        "file_server" => {
            let remote_path = row
                .remote_path
                .clone()
                .ok_or_else(|| Error::malformed(report, "file server recipient without path"))?;
            Ok(Recipient::FileServer { remote_path })
        }
        "email" => {
            let decode = |raw: Option<&str>| {
                raw.map(decode_text_array)
                    .transpose()
                    .map(Option::unwrap_or_default)
                    .map_err(|e| Error::malformed(report, e))
            };
            let to = decode(row.email_to.as_deref())?;
            if to.is_empty() {
                return Err(Error::malformed(report, "email recipient without addresses"));
            }
            Ok(Recipient::Email(EmailRecipient {
                to,
                cc: decode(row.email_cc.as_deref())?,
                subject_template: row.subject_template.clone().unwrap_or_default(),
                body_template: row.body_template.clone(),
            }))
        }
        other => Err(Error::malformed(
            report,
            format!("unknown recipient kind {other:?}"),
        )),
    }
}

fn decode_export(row: &ReportJoinRow) -> Result<ExportSpec> {
    let report = row.report_name.as_str();
    let format: ExportFormat = row
        .export_format
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e: Error| Error::malformed(report, e.to_string()))?;
    let order = decode_column_order(row.column_order.as_deref())
        .map_err(|e| Error::malformed(report, format!("invalid column order: {e}")))?;

    Ok(ExportSpec {
        format,
        template: row.template_body.clone(),
        filename_template: row.filename_template.clone(),
        order,
    })
}

#[derive(Default)]
struct ReportBuilder {
    title: String,
    group_id: Option<i64>,
    evaluation: String,
    active: bool,
    cards: BTreeMap<(i64, String), Card>,
    recipients: BTreeMap<(i64, i64), Recipient>,
    exports: BTreeMap<(i64, i64), ExportSpec>,
}

/// Group flat join rows into report aggregates, keeping first-seen report
/// order and position order within each report.
pub fn hydrate_reports(rows: Vec<ReportJoinRow>) -> Result<Vec<Report>> {
    let mut order: Vec<String> = Vec::new();
    let mut builders: HashMap<String, ReportBuilder> = HashMap::new();

    for row in rows {
        let builder = builders.entry(row.report_name.clone()).or_insert_with(|| {
            order.push(row.report_name.clone());
            ReportBuilder {
                title: row.report_title.clone(),
                group_id: row.group_id,
                evaluation: row.evaluation.clone(),
                active: row.active,
                ..Default::default()
            }
        });

        if let Some(uuid) = &row.card_uuid {
            let key = (row.card_position.unwrap_or_default(), uuid.clone());
            builder.cards.entry(key).or_insert_with(|| {
                Card::new(uuid.clone(), row.card_title.clone().unwrap_or_else(|| uuid.clone()))
            });
        }

        if let Some(id) = row.recipient_id {
            let key = (row.recipient_position.unwrap_or_default(), id);
            if !builder.recipients.contains_key(&key) {
                builder.recipients.insert(key, decode_recipient(&row)?);
            }
        }

        if let Some(id) = row.export_id {
            let key = (row.export_position.unwrap_or_default(), id);
            if !builder.exports.contains_key(&key) {
                builder.exports.insert(key, decode_export(&row)?);
            }
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|name| {
            let b = builders.remove(&name)?;
            Some(Report {
                name,
                title: b.title,
                group_id: b.group_id,
                queries: b.cards.into_values().collect(),
                evaluation: b.evaluation,
                exports: b.exports.into_values().collect(),
                recipients: b.recipients.into_values().collect(),
                active: b.active,
            })
        })
        .collect())
}
