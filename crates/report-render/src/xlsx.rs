//! XLSX workbook rendering.
//!
//! Every sheet holds one styled table. Cell types are inferred from the
//! string projection of each value so that numbers, booleans and dates are
//! stored natively rather than as text.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use rust_xlsxwriter::{ExcelDateTime, Format, Table, TableColumn, TableStyle, Workbook};

use crate::data::{Row, RowValue};
use crate::error::Result;

const MAX_SHEET_NAME_CHARS: usize = 31;
/// Largest magnitude an `f64` cell holds without rounding.
const MAX_EXACT_INT: u64 = 1 << 53;
const MIN_COLUMN_WIDTH: f64 = 10.0;
const WIDTH_FACTOR: f64 = 1.2;

/// One sheet of a workbook.
#[derive(Debug, Clone)]
pub struct Sheet<'a> {
    pub title: &'a str,
    pub rows: &'a [Row],
    pub columns: Vec<String>,
}

/// A typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Text(String),
}

/// Infer the cell type of a projected value.
///
/// Order: integer, float, boolean, timestamp, then text. Integers too large
/// for an exact spreadsheet number stay text.
pub fn infer_cell(text: &str) -> CellValue {
    if text.is_empty() || text == "<nil>" {
        return CellValue::Empty;
    }
    if let Ok(i) = text.parse::<i64>()
        && i.unsigned_abs() <= MAX_EXACT_INT
    {
        return CellValue::Int(i);
    }
    if is_integer_literal(text) {
        return CellValue::Text(text.to_string());
    }
    if let Ok(f) = text.parse::<f64>()
        && f.is_finite()
    {
        return CellValue::Float(f);
    }
    if let Some(b) = parse_bool(text) {
        return CellValue::Bool(b);
    }
    if let Some(cell) = parse_timestamp(text) {
        return cell;
    }
    CellValue::Text(text.to_string())
}

fn is_integer_literal(text: &str) -> bool {
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

const DATETIME_LAYOUTS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%d.%m.%Y %H:%M:%S",
];

const DATE_LAYOUTS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y"];

fn parse_timestamp(text: &str) -> Option<CellValue> {
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(CellValue::DateTime(ts.naive_local()));
    }
    for layout in DATETIME_LAYOUTS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(CellValue::DateTime(ts));
        }
    }
    for layout in DATE_LAYOUTS {
        if let Ok(date) = NaiveDate::parse_from_str(text, layout) {
            return Some(CellValue::Date(date));
        }
    }
    None
}

/// Make a sheet name acceptable to spreadsheet applications.
///
/// Forbidden characters, spaces and hyphens become `_`, the name is cut to
/// 31 characters, and names not starting with a Latin or Cyrillic letter or
/// `_` are prefixed with `Sheet_`. Trailing apostrophes are dropped since
/// workbooks reject them. Applying it twice changes nothing.
pub fn sanitize_sheet_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            ':' | '\\' | '/' | '?' | '*' | '[' | ']' | ' ' | '-' => '_',
            other => other,
        })
        .collect();
    let truncated = take_sheet_chars(&replaced);

    let valid_start = truncated
        .chars()
        .next()
        .is_some_and(|c| c == '_' || is_sheet_letter(c));
    if valid_start {
        truncated
    } else {
        take_sheet_chars(&format!("Sheet_{truncated}"))
    }
}

fn take_sheet_chars(name: &str) -> String {
    let truncated: String = name.chars().take(MAX_SHEET_NAME_CHARS).collect();
    truncated.trim_end_matches('\'').to_string()
}

fn is_sheet_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || ('\u{0400}'..='\u{04FF}').contains(&c)
}

/// Sanitize titles and disambiguate collisions, which workbooks reject.
fn unique_sheet_names<'a>(titles: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for title in titles {
        let base = sanitize_sheet_name(title);
        let mut candidate = base.clone();
        let mut n = 2;
        while names.iter().any(|e| e.eq_ignore_ascii_case(&candidate)) {
            let suffix = format!("_{n}");
            let keep = MAX_SHEET_NAME_CHARS - suffix.chars().count();
            candidate = base.chars().take(keep).collect::<String>() + &suffix;
            n += 1;
        }
        names.push(candidate);
    }
    names
}

fn column_width(column: &str, rows: &[Row]) -> f64 {
    let longest = rows
        .iter()
        .filter_map(|row| row.get(column))
        .map(|v| v.cell_text().chars().count())
        .chain(std::iter::once(column.chars().count()))
        .max()
        .unwrap_or(0);
    (longest as f64 * WIDTH_FACTOR).max(MIN_COLUMN_WIDTH)
}

/// `None` for dates outside the 1900-9999 range workbooks can store.
fn to_excel_date(date: &NaiveDate) -> Option<ExcelDateTime> {
    let year = u16::try_from(date.year()).ok()?;
    ExcelDateTime::from_ymd(year, date.month() as u8, date.day() as u8).ok()
}

fn to_excel_datetime(ts: &NaiveDateTime) -> Option<ExcelDateTime> {
    let seconds = ts.second() as f64 + ts.nanosecond() as f64 / 1e9;
    to_excel_date(&ts.date())?
        .and_hms(ts.hour() as u16, ts.minute() as u8, seconds)
        .ok()
}

/// Render a workbook with one table per sheet.
pub fn write_workbook(sheets: &[Sheet<'_>]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let datetime_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");
    let date_format = Format::new().set_num_format("yyyy-mm-dd");
    let names = unique_sheet_names(sheets.iter().map(|s| s.title));

    for (sheet, name) in sheets.iter().zip(names) {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&name)?;

        if sheet.columns.is_empty() {
            continue;
        }

        for (r, row) in sheet.rows.iter().enumerate() {
            let excel_row = (r + 1) as u32;
            for (c, column) in sheet.columns.iter().enumerate() {
                let col = c as u16;
                let text = row.get(column).map(RowValue::to_string).unwrap_or_default();
                match infer_cell(&text) {
                    CellValue::Empty => {}
                    CellValue::Int(i) => {
                        worksheet.write_number(excel_row, col, i as f64)?;
                    }
                    CellValue::Float(f) => {
                        worksheet.write_number(excel_row, col, f)?;
                    }
                    CellValue::Bool(b) => {
                        worksheet.write_boolean(excel_row, col, b)?;
                    }
                    CellValue::DateTime(ts) => match to_excel_datetime(&ts) {
                        Some(dt) => {
                            worksheet.write_datetime_with_format(
                                excel_row,
                                col,
                                &dt,
                                &datetime_format,
                            )?;
                        }
                        None => {
                            worksheet.write_string(excel_row, col, &text)?;
                        }
                    },
                    CellValue::Date(date) => match to_excel_date(&date) {
                        Some(dt) => {
                            worksheet.write_datetime_with_format(excel_row, col, &dt, &date_format)?;
                        }
                        None => {
                            worksheet.write_string(excel_row, col, &text)?;
                        }
                    },
                    CellValue::Text(s) => {
                        worksheet.write_string(excel_row, col, &s)?;
                    }
                }
            }
        }

        for (c, column) in sheet.columns.iter().enumerate() {
            worksheet.set_column_width(c as u16, column_width(column, sheet.rows))?;
        }

        let table_columns: Vec<TableColumn> = sheet
            .columns
            .iter()
            .map(|c| TableColumn::new().set_header(c))
            .collect();
        let table = Table::new()
            .set_columns(&table_columns)
            .set_style(TableStyle::Medium2)
            .set_banded_rows(true);
        let last_row = sheet.rows.len().max(1) as u32;
        let last_col = (sheet.columns.len() - 1) as u16;
        worksheet.add_table(0, 0, last_row, last_col, &table)?;
    }

    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Sales Q1", "Sales_Q1")]
    #[case("a/b:c", "a_b_c")]
    #[case("1st", "Sheet_1st")]
    #[case("", "Sheet_")]
    #[case("Отчёт-за-день", "Отчёт_за_день")]
    #[case("_hidden", "_hidden")]
    #[case("Q1 '", "Q1_")]
    #[case("'quoted'", "Sheet_'quoted")]
    #[case("'''", "Sheet_")]
    fn test_sanitize_sheet_name(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize_sheet_name(input), expected);
    }

    #[rstest]
    #[case("a very long sheet name that keeps on going")]
    #[case("9 lives [draft]")]
    #[case("Итоги: неделя")]
    #[case("012345678901234567890123'x")]
    fn test_sanitize_sheet_name_is_idempotent(#[case] input: &str) {
        let once = sanitize_sheet_name(input);
        assert!(once.chars().count() <= 31);
        assert_eq!(sanitize_sheet_name(&once), once);
    }

    #[test]
    fn test_unique_sheet_names() {
        let names = unique_sheet_names(["a b", "a-b", "c"].into_iter());
        assert_eq!(names, vec!["a_b", "a_b_2", "c"]);
    }

    #[rstest]
    #[case("<nil>", CellValue::Empty)]
    #[case("42", CellValue::Int(42))]
    #[case("-1.25", CellValue::Float(-1.25))]
    #[case("true", CellValue::Bool(true))]
    #[case("F", CellValue::Bool(false))]
    #[case("2024-03-01", CellValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()))]
    #[case("01.03.2024", CellValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()))]
    #[case("NaN", CellValue::Text("NaN".into()))]
    #[case("9007199254740992", CellValue::Int(9007199254740992))]
    #[case("9007199254740993", CellValue::Text("9007199254740993".into()))]
    #[case("-9223372036854775808", CellValue::Text("-9223372036854775808".into()))]
    #[case("123456789012345678901234", CellValue::Text("123456789012345678901234".into()))]
    #[case("hello", CellValue::Text("hello".into()))]
    fn test_infer_cell(#[case] input: &str, #[case] expected: CellValue) {
        assert_eq!(infer_cell(input), expected);
    }

    #[test]
    fn test_infer_cell_datetime() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        assert_eq!(
            infer_cell("2024-03-01 10:30:00"),
            CellValue::DateTime(expected)
        );
        assert_eq!(
            infer_cell("2024-03-01T10:30:00Z"),
            CellValue::DateTime(expected)
        );
    }

    #[test]
    fn test_column_width_floor() {
        let mut row = Row::new();
        row.insert("id".into(), RowValue::Int(1));
        assert_eq!(column_width("id", &[row.clone()]), 10.0);

        row.insert("long".into(), RowValue::from("abcdefghijklmnopqrst"));
        assert!((column_width("long", &[row]) - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_write_workbook_produces_zip() {
        let mut row = Row::new();
        row.insert("n".into(), RowValue::Int(5));
        let rows = vec![row];
        let sheets = vec![Sheet {
            title: "Card 1",
            rows: &rows,
            columns: vec!["n".to_string()],
        }];

        let bytes = write_workbook(&sheets).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn test_write_workbook_keeps_unrepresentable_values_as_text() {
        let mut row = Row::new();
        row.insert("born".into(), RowValue::from("01.01.1800"));
        row.insert("seen".into(), RowValue::from("1899-12-31 23:59:59"));
        row.insert("id".into(), RowValue::from("9007199254740993"));
        let rows = vec![row];
        let sheets = vec![Sheet {
            title: "People '",
            rows: &rows,
            columns: vec!["born".to_string(), "seen".to_string(), "id".to_string()],
        }];

        assert!(matches!(
            infer_cell("01.01.1800"),
            CellValue::Date(d) if d.year() == 1800
        ));
        let bytes = write_workbook(&sheets).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }
}
