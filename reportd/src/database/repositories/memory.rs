//! In-memory repository for unit tests.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::ReportRepository;
use crate::Result;
use crate::database::models::ScheduleDbModel;
use crate::domain::{EventBinding, Report};

#[derive(Default)]
pub(crate) struct MemoryReportRepository {
    pub schedules: Mutex<Vec<ScheduleDbModel>>,
    pub events: Mutex<Vec<EventBinding>>,
    pub reports: Mutex<Vec<Report>>,
    /// Names of the methods called, in order.
    pub calls: Mutex<Vec<&'static str>>,
    /// Latency added to every load.
    pub latency: Option<Duration>,
}

impl MemoryReportRepository {
    pub fn set_schedule(&self, entries: &[(&str, &str)]) {
        *self.schedules.lock() = entries
            .iter()
            .map(|(name, expr)| ScheduleDbModel {
                cron_name: name.to_string(),
                cron_expr: expr.to_string(),
            })
            .collect();
    }

    pub fn bind(&self, cron_name: &str, report_name: &str) {
        self.events.lock().push(EventBinding {
            cron_name: cron_name.into(),
            report_name: report_name.into(),
        });
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|m| **m == method).count()
    }

    async fn enter(&self, method: &'static str) {
        self.calls.lock().push(method);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ReportRepository for MemoryReportRepository {
    async fn load_schedule(&self) -> Result<Vec<ScheduleDbModel>> {
        self.enter("load_schedule").await;
        Ok(self.schedules.lock().clone())
    }

    async fn load_all_events(&self) -> Result<Vec<EventBinding>> {
        self.enter("load_all_events").await;
        Ok(self.events.lock().clone())
    }

    async fn load_events_by_cron(&self, cron_name: &str) -> Result<Vec<EventBinding>> {
        self.enter("load_events_by_cron").await;
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.cron_name == cron_name)
            .cloned()
            .collect())
    }

    async fn load_reports_by_name(&self, name: &str) -> Result<Vec<Report>> {
        self.enter("load_reports_by_name").await;
        Ok(self
            .reports
            .lock()
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect())
    }

    async fn load_active_reports(&self) -> Result<Vec<Report>> {
        self.enter("load_active_reports").await;
        Ok(self.reports.lock().iter().filter(|r| r.active).cloned().collect())
    }
}
