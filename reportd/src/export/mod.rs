//! Rendering of report exports.
//!
//! Turns one [`ExportSpec`] plus the fetched data into a [`ReportData`]
//! artifact. The format codecs live in `report_render`; this module decides
//! which rows, column orders and names flow into them.

use std::sync::Arc;

use report_render::artifact::indexed_name;
use report_render::tabular::{column_order, to_matrix};
use report_render::xlsx::{Sheet, write_workbook};
use report_render::{
    Attachment, FetchResult, Matrix, ParseMode, PdfRenderer, ReportData, Row, TableImageRenderer,
    TemplateEngine, csv_export, html,
};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::domain::{ExportFormat, ExportSpec, Report};
use crate::{Error, Result};

/// Context of export body templates.
#[derive(Serialize)]
struct ExportContext<'a> {
    report: &'a FetchResult,
    rows: &'a [Row],
    title: &'a str,
    name: &'a str,
}

/// Context of filename, subject and email body templates.
#[derive(Serialize)]
pub struct NameContext<'a> {
    pub title: &'a str,
    pub name: &'a str,
}

impl<'a> NameContext<'a> {
    pub fn of(report: &'a Report) -> Self {
        Self {
            title: &report.title,
            name: &report.name,
        }
    }
}

/// Everything an export needs about one job.
pub struct ExportInput<'a> {
    pub report: &'a Report,
    pub data: &'a FetchResult,
    /// Raw card matrices, in card order. Only fetched when a PNG export
    /// needs them.
    pub matrices: &'a [(String, Matrix)],
}

/// Renders exports into artifacts.
pub struct Exporter {
    templates: Arc<TemplateEngine>,
    images: Option<Arc<TableImageRenderer>>,
    pdf: PdfRenderer,
}

impl Exporter {
    pub fn new(
        templates: Arc<TemplateEngine>,
        images: Option<Arc<TableImageRenderer>>,
        pdf: PdfRenderer,
    ) -> Self {
        Self {
            templates,
            images,
            pdf,
        }
    }

    /// Whether rendering `report` needs the raw card matrices.
    pub fn needs_matrices(report: &Report) -> bool {
        report.exports.iter().any(|e| e.format == ExportFormat::Png)
    }

    /// Render one export.
    #[instrument(skip_all, fields(report = %input.report.name, format = %spec.format))]
    pub async fn export(&self, input: &ExportInput<'_>, spec: &ExportSpec) -> Result<ReportData> {
        let file_name = self.file_name(input.report, spec)?;

        let data = match spec.format {
            ExportFormat::Text => ReportData::Text {
                body: self.render_body(input, spec)?,
                parse_mode: ParseMode::Html,
            },
            ExportFormat::Markdown => ReportData::Text {
                body: self.render_body(input, spec)?,
                parse_mode: ParseMode::MarkdownV2,
            },
            ExportFormat::Html => {
                let page = self.html_page(input, spec)?;
                ReportData::FileSet(vec![Attachment::new(file_name, page.into_bytes())])
            }
            ExportFormat::Csv => ReportData::FileSet(csv_files(input.data, spec, &file_name)?),
            ExportFormat::Xlsx => {
                let sheets: Vec<Sheet<'_>> = input
                    .data
                    .iter()
                    .map(|(title, rows)| Sheet {
                        title,
                        rows,
                        columns: column_order(rows, spec.order_for(title)),
                    })
                    .collect();
                ReportData::FileSet(vec![Attachment::new(file_name, write_workbook(&sheets)?)])
            }
            ExportFormat::Png => ReportData::ImageSet(self.png_images(input, spec, &file_name).await?),
            ExportFormat::Pdf => {
                let pages = match spec.template {
                    Some(_) => vec![self.html_page(input, spec)?],
                    None => input
                        .data
                        .iter()
                        .map(|(title, rows)| html::table_page(title, &ordered_matrix(rows, spec, title)))
                        .collect(),
                };
                let pdf = self.pdf.render(&pages).await?;
                ReportData::FileSet(vec![Attachment::new(file_name, pdf)])
            }
        };

        debug!(kind = data.kind(), files = data.attachments().len(), "Export rendered");
        Ok(data)
    }

    /// Name of the export's artifact: the rendered filename template, or
    /// `<report name>.<ext>`.
    pub fn file_name(&self, report: &Report, spec: &ExportSpec) -> Result<String> {
        let default = || format!("{}.{}", report.name, spec.format.extension());
        match spec.filename_template.as_deref().map(str::trim) {
            None | Some("") => Ok(default()),
            Some(template) => {
                let name = self
                    .templates
                    .render(template, NameContext::of(report))
                    .map_err(|e| Error::Template(e.to_string()))?;
                let name = name.trim();
                Ok(if name.is_empty() { default() } else { name.to_string() })
            }
        }
    }

    fn render_body(&self, input: &ExportInput<'_>, spec: &ExportSpec) -> Result<String> {
        let template = spec.template.as_deref().ok_or_else(|| {
            Error::Template(format!("{} export requires a template", spec.format))
        })?;
        let ctx = ExportContext {
            report: input.data,
            rows: input.data.first().map(|(_, rows)| rows).unwrap_or(&[]),
            title: &input.report.title,
            name: &input.report.name,
        };
        self.templates
            .render(template, ctx)
            .map_err(|e| Error::Template(e.to_string()))
    }

    fn html_page(&self, input: &ExportInput<'_>, spec: &ExportSpec) -> Result<String> {
        if spec.template.is_some() {
            let body = self.render_body(input, spec)?;
            return Ok(html::ensure_document(&input.report.title, &body));
        }

        let matrices: Vec<(&str, Matrix)> = input
            .data
            .iter()
            .map(|(title, rows)| (title, ordered_matrix(rows, spec, title)))
            .collect();
        let sections: Vec<(&str, &Matrix)> = matrices.iter().map(|(t, m)| (*t, m)).collect();
        Ok(html::tables_page(&input.report.title, &sections))
    }

    async fn png_images(
        &self,
        input: &ExportInput<'_>,
        spec: &ExportSpec,
        file_name: &str,
    ) -> Result<Vec<Attachment>> {
        let renderer = self.images.clone().ok_or_else(|| {
            Error::config("PNG export needs REPORTD_RENDER_FONT_PATH to be set")
        })?;

        let total = input.data.len();
        let mut images = Vec::with_capacity(total);
        for (index, (title, rows)) in input.data.iter().enumerate() {
            let matrix = match spec.order_for(title) {
                Some(_) => ordered_matrix(rows, spec, title),
                None => input
                    .matrices
                    .iter()
                    .find(|(t, _)| t == title)
                    .map(|(_, m)| m.clone())
                    .unwrap_or_else(|| ordered_matrix(rows, spec, title)),
            };

            let renderer = renderer.clone();
            let caption = title.to_string();
            let png = tokio::task::spawn_blocking(move || renderer.render(&matrix, Some(&caption)))
                .await
                .map_err(|e| Error::Other(format!("PNG rendering task failed: {e}")))??;
            images.push(Attachment::new(indexed_name(file_name, index, total), png));
        }
        Ok(images)
    }
}

fn ordered_matrix(rows: &[Row], spec: &ExportSpec, title: &str) -> Matrix {
    to_matrix(rows, &column_order(rows, spec.order_for(title)))
}

fn csv_files(data: &FetchResult, spec: &ExportSpec, file_name: &str) -> Result<Vec<Attachment>> {
    let total = data.len();
    data.iter()
        .enumerate()
        .map(|(index, (title, rows))| {
            let columns = column_order(rows, spec.order_for(title));
            let body = csv_export::write_csv(rows, &columns)?;
            Ok(Attachment::new(indexed_name(file_name, index, total), body))
        })
        .collect()
}
