//! Repository layer for database access.

#[cfg(test)]
pub(crate) mod memory;
pub mod report;

pub use report::{ReportRepository, SqlxReportRepository};
