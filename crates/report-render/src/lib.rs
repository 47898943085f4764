//! Rendering codecs for tabular report data.
//!
//! This crate has no knowledge of schedules, recipients or sinks. It takes
//! fetched rows and turns them into presentation formats:
//!
//! - [`template`]: Jinja-style text templates with date and escaping helpers
//! - [`csv_export`]: CSV documents with declared column order
//! - [`xlsx`]: typed XLSX workbooks, one styled table per sheet
//! - [`png`]: bordered table images with optional title block
//! - [`html`]: standalone HTML table pages
//! - [`pdf`]: PDF documents assembled from HTML pages via `wkhtmltopdf`

pub mod artifact;
pub mod csv_export;
pub mod data;
pub mod error;
pub mod html;
pub mod pdf;
pub mod png;
pub mod tabular;
pub mod template;
pub mod xlsx;

pub use artifact::{Attachment, ParseMode, ReportData};
pub use data::{FetchResult, Matrix, Row, RowValue};
pub use error::{RenderError, Result};
pub use pdf::PdfRenderer;
pub use png::{TableImageRenderer, TableStyle};
pub use template::TemplateEngine;
