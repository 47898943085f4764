//! Rendered report artifacts handed to delivery sinks.

use bytes::Bytes;

/// Telegram-style text formatting hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    #[default]
    Plain,
    Html,
    MarkdownV2,
}

impl ParseMode {
    /// Name used by the Bot API `parse_mode` parameter.
    pub fn as_api_str(&self) -> Option<&'static str> {
        match self {
            ParseMode::Plain => None,
            ParseMode::Html => Some("HTML"),
            ParseMode::MarkdownV2 => Some("MarkdownV2"),
        }
    }
}

/// A named binary payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub data: Bytes,
}

impl Attachment {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Output of one export.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportData {
    Text { body: String, parse_mode: ParseMode },
    ImageSet(Vec<Attachment>),
    FileSet(Vec<Attachment>),
}

impl ReportData {
    pub fn kind(&self) -> &'static str {
        match self {
            ReportData::Text { .. } => "text",
            ReportData::ImageSet(_) => "image set",
            ReportData::FileSet(_) => "file set",
        }
    }

    pub fn attachments(&self) -> &[Attachment] {
        match self {
            ReportData::Text { .. } => &[],
            ReportData::ImageSet(items) | ReportData::FileSet(items) => items,
        }
    }
}

/// Name the n-th file of a multi-file export. Single outputs keep the
/// plain name; several outputs are prefixed `1_`, `2_`, ...
pub fn indexed_name(base: &str, index: usize, total: usize) -> String {
    if total <= 1 {
        base.to_string()
    } else {
        format!("{}_{}", index + 1, base)
    }
}
