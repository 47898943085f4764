//! Standalone HTML table pages.

use std::fmt::Write;

use crate::data::Matrix;

const STYLE: &str = "body{font-family:sans-serif;font-size:12px}\
table{border-collapse:collapse}\
th,td{border:1px solid #000;padding:6px;text-align:left;vertical-align:top}\
th{background:#808080}\
tr:nth-child(even) td{background:#d5d5d5}";

/// Escape text for HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Render a header-first matrix as a complete HTML document.
pub fn table_page(title: &str, matrix: &Matrix) -> String {
    tables_page(title, &[(title, matrix)])
}

/// Render several titled matrices into one document, one section each.
pub fn tables_page(title: &str, sections: &[(&str, &Matrix)]) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{}</title>\
         <style>{STYLE}</style></head><body>\n",
        escape_html(title)
    );
    for (heading, matrix) in sections {
        let _ = writeln!(html, "<h2>{}</h2>", escape_html(heading));
        write_table(&mut html, matrix);
    }
    html.push_str("</body></html>\n");
    html
}

fn write_table(html: &mut String, matrix: &Matrix) {
    html.push_str("<table>\n");
    let mut rows = matrix.iter();
    if let Some(header) = rows.next() {
        html.push_str("<tr>");
        for cell in header {
            let _ = write!(html, "<th>{}</th>", escape_html(cell));
        }
        html.push_str("</tr>\n");
    }
    for row in rows {
        html.push_str("<tr>");
        for cell in row {
            let _ = write!(html, "<td>{}</td>", escape_html(cell));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</table>\n");
}

/// Wrap an already rendered HTML fragment into a document unless it already
/// is one.
pub fn ensure_document(title: &str, body: &str) -> String {
    let trimmed = body.trim_start();
    if trimmed.starts_with("<!DOCTYPE") || trimmed.starts_with("<html") {
        return body.to_string();
    }
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{}</title></head><body>\n{}\n</body></html>\n",
        escape_html(title),
        body
    )
}
