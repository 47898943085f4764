//! Domain layer: report aggregates and the value objects they are built from.

pub mod card;
pub mod cron;
pub mod export;
pub mod recipient;
pub mod report;
pub mod value_objects;

pub use card::Card;
pub use cron::CronExpr;
pub use export::{ColumnOrder, ExportFormat, ExportSpec};
pub use recipient::{EmailRecipient, Recipient};
pub use report::{EventBinding, Report, ScheduleUnit};
pub use value_objects::RetryPolicy;
