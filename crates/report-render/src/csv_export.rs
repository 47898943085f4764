//! CSV encoding and decoding.

use crate::data::{Matrix, Row};
use crate::error::{RenderError, Result};

/// Encode rows as CSV with a header line of `columns`.
pub fn write_csv(rows: &[Row], columns: &[String]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns)?;
    for row in rows {
        writer.write_record(
            columns
                .iter()
                .map(|c| row.get(c).map(|v| v.cell_text()).unwrap_or_default()),
        )?;
    }
    writer
        .into_inner()
        .map_err(|e| RenderError::Io(e.into_error()))
}

/// Decode a CSV document into a raw matrix. The first record is kept as
/// the header row; ragged records are accepted.
pub fn parse_matrix(input: &[u8]) -> Result<Matrix> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);

    let mut matrix = Vec::new();
    for record in reader.records() {
        let record = record?;
        matrix.push(record.iter().map(str::to_string).collect());
    }
    Ok(matrix)
}
