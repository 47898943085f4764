//! Column ordering and matrix projection.

use std::collections::BTreeSet;

use crate::data::{Matrix, Row};

/// Columns to emit for `rows`.
///
/// A declared order wins. Otherwise the sorted union of all field names is
/// used, so the output is stable across runs.
pub fn column_order(rows: &[Row], order: Option<&[String]>) -> Vec<String> {
    if let Some(order) = order.filter(|o| !o.is_empty()) {
        return order.to_vec();
    }
    rows.iter()
        .flat_map(|row| row.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Project rows into a header-first matrix of display strings.
pub fn to_matrix(rows: &[Row], columns: &[String]) -> Matrix {
    let mut matrix = Vec::with_capacity(rows.len() + 1);
    matrix.push(columns.to_vec());
    for row in rows {
        matrix.push(
            columns
                .iter()
                .map(|c| row.get(c).map(|v| v.cell_text()).unwrap_or_default())
                .collect(),
        );
    }
    matrix
}
