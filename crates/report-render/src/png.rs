//! Table image rendering.
//!
//! A matrix is laid out into a bordered grid: the first row is a grey
//! header drawn in the bold face, data rows alternate between light grey and
//! white, and long cell text is word-wrapped to the column width. An optional
//! title block is drawn above the table.

use std::io::Cursor;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::data::Matrix;
use crate::error::{RenderError, Result};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const HEADER_FILL: Rgba<u8> = Rgba([0x80, 0x80, 0x80, 255]);
const STRIPE_FILL: Rgba<u8> = Rgba([0xd5, 0xd5, 0xd5, 255]);

/// Line height as a multiple of the font size.
pub const LINE_SPACING: f32 = 1.4;

/// Geometry settings for table images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableStyle {
    pub font_size: f32,
    /// Inner padding on every side of a cell.
    pub padding: u32,
    pub min_column_width: u32,
    pub max_column_width: u32,
    pub title_padding: u32,
}

impl Default for TableStyle {
    fn default() -> Self {
        Self {
            font_size: 14.0,
            padding: 6,
            min_column_width: 50,
            max_column_width: 400,
            title_padding: 10,
        }
    }
}

/// Measures rendered text.
pub trait TextMeasure {
    fn text_width(&self, text: &str) -> f32;
    fn line_height(&self) -> f32;
}

struct FontMeasure<'a> {
    font: &'a FontVec,
    scale: PxScale,
}

impl TextMeasure for FontMeasure<'_> {
    fn text_width(&self, text: &str) -> f32 {
        text_size(self.scale, self.font, text).0 as f32
    }

    fn line_height(&self) -> f32 {
        self.scale.y * LINE_SPACING
    }
}

/// Computed grid geometry with wrapped cell lines.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    pub column_widths: Vec<u32>,
    pub row_heights: Vec<u32>,
    pub cells: Vec<Vec<Vec<String>>>,
}

impl TableLayout {
    pub fn width(&self) -> u32 {
        self.column_widths.iter().sum::<u32>() + 1
    }

    pub fn height(&self) -> u32 {
        self.row_heights.iter().sum::<u32>() + 1
    }
}

/// Greedily pack words into lines no wider than `max_width`.
///
/// A single word wider than the limit is kept whole on its own line.
pub fn wrap_text(text: &str, max_width: f32, measure: &dyn TextMeasure) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if current.is_empty() {
                current.push_str(word);
                continue;
            }
            let candidate = format!("{current} {word}");
            if measure.text_width(&candidate) > max_width {
                lines.push(std::mem::replace(&mut current, word.to_string()));
            } else {
                current = candidate;
            }
        }
        lines.push(current);
    }
    lines
}

/// Compute column widths, wrapped lines and row heights for `matrix`.
pub fn layout_table(matrix: &Matrix, measure: &dyn TextMeasure, style: &TableStyle) -> TableLayout {
    let columns = matrix.iter().map(Vec::len).max().unwrap_or(0);
    let pad = style.padding as f32;

    let column_widths: Vec<u32> = (0..columns)
        .map(|c| {
            let widest = matrix
                .iter()
                .filter_map(|row| row.get(c))
                .map(|cell| measure.text_width(cell))
                .fold(0.0f32, f32::max);
            ((widest + 2.0 * pad).ceil() as u32)
                .clamp(style.min_column_width, style.max_column_width.max(style.min_column_width))
        })
        .collect();

    let line_height = measure.line_height();
    let mut cells = Vec::with_capacity(matrix.len());
    let mut row_heights = Vec::with_capacity(matrix.len());
    for row in matrix {
        let wrapped: Vec<Vec<String>> = (0..columns)
            .map(|c| {
                let text = row.get(c).map(String::as_str).unwrap_or("");
                let available = column_widths[c] as f32 - 2.0 * pad;
                wrap_text(text, available, measure)
            })
            .collect();
        let lines = wrapped.iter().map(Vec::len).max().unwrap_or(1).max(1);
        row_heights.push((lines as f32 * line_height + 2.0 * pad).ceil() as u32);
        cells.push(wrapped);
    }

    TableLayout {
        column_widths,
        row_heights,
        cells,
    }
}

/// Renders matrices to PNG using a regular and a bold font face.
pub struct TableImageRenderer {
    regular: FontVec,
    bold: FontVec,
    style: TableStyle,
}

impl std::fmt::Debug for TableImageRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableImageRenderer")
            .field("style", &self.style)
            .finish_non_exhaustive()
    }
}

impl TableImageRenderer {
    pub fn from_bytes(regular: Vec<u8>, bold: Vec<u8>, style: TableStyle) -> Result<Self> {
        let regular =
            FontVec::try_from_vec(regular).map_err(|e| RenderError::Font(e.to_string()))?;
        let bold = FontVec::try_from_vec(bold).map_err(|e| RenderError::Font(e.to_string()))?;
        Ok(Self {
            regular,
            bold,
            style,
        })
    }

    pub fn from_files(regular: &Path, bold: &Path, style: TableStyle) -> Result<Self> {
        let read = |path: &Path| {
            std::fs::read(path)
                .map_err(|e| RenderError::Font(format!("{}: {}", path.display(), e)))
        };
        Self::from_bytes(read(regular)?, read(bold)?, style)
    }

    pub fn style(&self) -> &TableStyle {
        &self.style
    }

    fn scale(&self) -> PxScale {
        PxScale::from(self.style.font_size)
    }

    /// Render `matrix` as a PNG, with `title` drawn above when non-empty.
    pub fn render(&self, matrix: &Matrix, title: Option<&str>) -> Result<Vec<u8>> {
        if matrix.is_empty() {
            return Err(RenderError::InvalidInput("empty matrix".to_string()));
        }

        let scale = self.scale();
        let measure = FontMeasure {
            font: &self.regular,
            scale,
        };
        let layout = layout_table(matrix, &measure, &self.style);
        let table = self.draw_table(&layout, measure.line_height());

        let canvas = match title.filter(|t| !t.trim().is_empty()) {
            Some(title) => self.with_title(table, title),
            None => table,
        };

        let mut out = Vec::new();
        DynamicImage::ImageRgba8(canvas).write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
        Ok(out)
    }

    fn draw_table(&self, layout: &TableLayout, line_height: f32) -> RgbaImage {
        let scale = self.scale();
        let pad = self.style.padding as i32;
        let mut img = RgbaImage::from_pixel(layout.width(), layout.height(), WHITE);

        let mut y = 0i32;
        for (r, (row, height)) in layout.cells.iter().zip(&layout.row_heights).enumerate() {
            let fill = match r {
                0 => HEADER_FILL,
                n if n % 2 == 1 => STRIPE_FILL,
                _ => WHITE,
            };
            let font = if r == 0 { &self.bold } else { &self.regular };

            let mut x = 0i32;
            for (lines, width) in row.iter().zip(&layout.column_widths) {
                let cell = Rect::at(x, y).of_size(width + 1, height + 1);
                draw_filled_rect_mut(&mut img, cell, fill);
                draw_hollow_rect_mut(&mut img, cell, BLACK);

                for (i, line) in lines.iter().enumerate() {
                    if line.is_empty() {
                        continue;
                    }
                    let ty = y + pad + (i as f32 * line_height) as i32;
                    draw_text_mut(&mut img, BLACK, x + pad, ty, scale, font, line);
                }
                x += *width as i32;
            }
            y += *height as i32;
        }
        img
    }

    fn with_title(&self, table: RgbaImage, title: &str) -> RgbaImage {
        let scale = self.scale();
        let title_pad = self.style.title_padding;
        let title_size = text_size(scale, &self.bold, title);

        let block = TitleBlock::fit(table.width(), title_size, title_pad);
        let mut canvas = RgbaImage::from_pixel(block.width, block.height + table.height(), WHITE);

        draw_text_mut(&mut canvas, BLACK, block.text_x, title_pad as i32, scale, &self.bold, title);
        image::imageops::overlay(&mut canvas, &table, 0, block.height as i64);
        canvas
    }
}

/// Canvas geometry of the title band above a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TitleBlock {
    width: u32,
    height: u32,
    text_x: i32,
}

impl TitleBlock {
    /// Size the band from the measured title extent, centring the text.
    fn fit(table_width: u32, (title_width, title_height): (u32, u32), pad: u32) -> Self {
        let width = table_width.max(title_width + 2 * pad);
        Self {
            width,
            height: title_height + 2 * pad,
            text_x: (width.saturating_sub(title_width) / 2) as i32,
        }
    }
}
