//! Export specifications.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Declared column order per card (sheet) title.
pub type ColumnOrder = BTreeMap<String, Vec<String>>;

/// Output format of one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Template text sent with HTML parse mode.
    Text,
    /// Template text sent with MarkdownV2 parse mode.
    Markdown,
    Html,
    Csv,
    Xlsx,
    Png,
    Pdf,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Png => "png",
            Self::Pdf => "pdf",
        }
    }

    /// File extension for file-producing formats.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Markdown => "md",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "markdown" | "md" => Ok(Self::Markdown),
            "html" => Ok(Self::Html),
            "csv" => Ok(Self::Csv),
            "xlsx" | "excel" => Ok(Self::Xlsx),
            "png" | "image" => Ok(Self::Png),
            "pdf" => Ok(Self::Pdf),
            other => Err(Error::Other(format!("unknown export format: {other}"))),
        }
    }
}

/// How one export of a report is rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSpec {
    pub format: ExportFormat,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub filename_template: Option<String>,
    #[serde(default)]
    pub order: ColumnOrder,
}

impl ExportSpec {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            template: None,
            filename_template: None,
            order: ColumnOrder::new(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_filename(mut self, filename_template: impl Into<String>) -> Self {
        self.filename_template = Some(filename_template.into());
        self
    }

    pub fn with_order(mut self, title: impl Into<String>, columns: &[&str]) -> Self {
        self.order
            .insert(title.into(), columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Column order declared for `title`, if any.
    pub fn order_for(&self, title: &str) -> Option<&[String]> {
        self.order.get(title).map(Vec::as_slice)
    }

    /// Whether this export renders without fetched data.
    pub fn ignores_data(&self) -> bool {
        self.template.is_some() && matches!(self.format, ExportFormat::Text | ExportFormat::Markdown | ExportFormat::Html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("md".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert!("docx".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_extensions() {
        assert_eq!(ExportFormat::Xlsx.extension(), "xlsx");
        assert_eq!(ExportFormat::Text.extension(), "txt");
    }

    #[test]
    fn test_order_for() {
        let spec = ExportSpec::new(ExportFormat::Xlsx).with_order("Q", &["a", "b"]);
        assert_eq!(spec.order_for("Q").unwrap(), ["a", "b"]);
        assert!(spec.order_for("other").is_none());
    }
}
