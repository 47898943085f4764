//! Database models and their conversion into domain aggregates.

pub mod report;
pub mod schedule;

pub use report::{ReportJoinRow, decode_column_order, decode_text_array, hydrate_reports};
pub use schedule::{EventDbModel, ScheduleDbModel};
