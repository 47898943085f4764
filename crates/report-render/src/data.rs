//! Row data model shared by fetchers, evaluators and renderers.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single scalar cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<FixedOffset>),
}

impl RowValue {
    /// Convert a decoded JSON value into a cell.
    ///
    /// Nested arrays and objects are kept as their compact JSON text.
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => RowValue::Null,
            Value::Bool(b) => RowValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => RowValue::Int(i),
                None => RowValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => RowValue::String(s),
            other => RowValue::String(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RowValue::Null)
    }

    /// Text shown in rendered tables: nulls are blank.
    pub fn cell_text(&self) -> String {
        match self {
            RowValue::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// The string projection of a cell. Nulls project to `<nil>`.
impl fmt::Display for RowValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowValue::Null => f.write_str("<nil>"),
            RowValue::Bool(b) => write!(f, "{b}"),
            RowValue::Int(i) => write!(f, "{i}"),
            RowValue::Float(v) => write!(f, "{v}"),
            RowValue::String(s) => f.write_str(s),
            RowValue::Timestamp(ts) => {
                f.write_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

impl Serialize for RowValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RowValue::Null => serializer.serialize_unit(),
            RowValue::Bool(b) => serializer.serialize_bool(*b),
            RowValue::Int(i) => serializer.serialize_i64(*i),
            RowValue::Float(v) => serializer.serialize_f64(*v),
            RowValue::String(s) => serializer.serialize_str(s),
            RowValue::Timestamp(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for RowValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(RowValue::from_json)
    }
}

impl From<&str> for RowValue {
    fn from(value: &str) -> Self {
        RowValue::String(value.to_string())
    }
}

impl From<String> for RowValue {
    fn from(value: String) -> Self {
        RowValue::String(value)
    }
}

impl From<i64> for RowValue {
    fn from(value: i64) -> Self {
        RowValue::Int(value)
    }
}

impl From<f64> for RowValue {
    fn from(value: f64) -> Self {
        RowValue::Float(value)
    }
}

impl From<bool> for RowValue {
    fn from(value: bool) -> Self {
        RowValue::Bool(value)
    }
}

/// One result row: column name to cell.
pub type Row = BTreeMap<String, RowValue>;

/// A 2-D grid of display strings, header first.
pub type Matrix = Vec<Vec<String>>;

/// Rows keyed by card title, kept in insertion order.
///
/// Inserting a title that already exists replaces its rows in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    entries: Vec<(String, Vec<Row>)>,
}

impl FetchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, title: impl Into<String>, rows: Vec<Row>) {
        let title = title.into();
        match self.entries.iter_mut().find(|(t, _)| *t == title) {
            Some(entry) => entry.1 = rows,
            None => self.entries.push((title, rows)),
        }
    }

    pub fn get(&self, title: &str) -> Option<&[Row]> {
        self.entries
            .iter()
            .find(|(t, _)| t == title)
            .map(|(_, rows)| rows.as_slice())
    }

    pub fn contains_key(&self, title: &str) -> bool {
        self.get(title).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Row])> {
        self.entries
            .iter()
            .map(|(title, rows)| (title.as_str(), rows.as_slice()))
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(title, _)| title.as_str())
    }

    /// The first card's entry in insertion order.
    pub fn first(&self) -> Option<(&str, &[Row])> {
        self.iter().next()
    }
}

impl FromIterator<(String, Vec<Row>)> for FetchResult {
    fn from_iter<I: IntoIterator<Item = (String, Vec<Row>)>>(iter: I) -> Self {
        let mut result = FetchResult::new();
        for (title, rows) in iter {
            result.insert(title, rows);
        }
        result
    }
}

impl Serialize for FetchResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (title, rows) in &self.entries {
            map.serialize_entry(title, rows)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, RowValue)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(RowValue::from_json(json!(null)), RowValue::Null);
        assert_eq!(RowValue::from_json(json!(42)), RowValue::Int(42));
        assert_eq!(RowValue::from_json(json!(1.5)), RowValue::Float(1.5));
        assert_eq!(RowValue::from_json(json!("x")), RowValue::from("x"));
        assert_eq!(
            RowValue::from_json(json!([1, 2])),
            RowValue::from("[1,2]")
        );
    }

    #[test]
    fn test_string_projection() {
        assert_eq!(RowValue::Null.to_string(), "<nil>");
        assert_eq!(RowValue::Null.cell_text(), "");
        assert_eq!(RowValue::Float(3.0).to_string(), "3");
        assert_eq!(RowValue::Bool(true).to_string(), "true");
        let ts = DateTime::parse_from_rfc3339("2024-03-01T10:00:00+03:00").unwrap();
        assert_eq!(
            RowValue::Timestamp(ts).to_string(),
            "2024-03-01T10:00:00+03:00"
        );
    }

    #[test]
    fn test_fetch_result_keeps_insertion_order() {
        let mut result = FetchResult::new();
        result.insert("b", vec![row(&[("n", RowValue::Int(1))])]);
        result.insert("a", vec![]);
        result.insert("b", vec![]);

        assert_eq!(result.len(), 2);
        assert_eq!(result.titles().collect::<Vec<_>>(), vec!["b", "a"]);
        assert!(result.get("b").unwrap().is_empty());
        assert_eq!(result.first().map(|(t, _)| t), Some("b"));
    }

    #[test]
    fn test_fetch_result_serializes_as_map() {
        let result: FetchResult = vec![(
            "Sales".to_string(),
            vec![row(&[("n", RowValue::Int(7)), ("x", RowValue::Null)])],
        )]
        .into_iter()
        .collect();

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!({"Sales": [{"n": 7, "x": null}]}));
    }
}
