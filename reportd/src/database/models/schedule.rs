//! Schedule and event binding rows.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{CronExpr, EventBinding, ScheduleUnit};
use crate::Result;

/// One active schedule as stored.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScheduleDbModel {
    pub cron_name: String,
    pub cron_expr: String,
}

impl ScheduleDbModel {
    /// Validate the stored expression.
    pub fn into_unit(self) -> Result<ScheduleUnit> {
        Ok(ScheduleUnit {
            cron: CronExpr::parse(&self.cron_expr)?,
            cron_name: self.cron_name,
        })
    }
}

/// A report bound to an event name.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EventDbModel {
    pub cron_name: String,
    pub report_name: String,
}

impl From<EventDbModel> for EventBinding {
    fn from(model: EventDbModel) -> Self {
        Self {
            cron_name: model.cron_name,
            report_name: model.report_name,
        }
    }
}
