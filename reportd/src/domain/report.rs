//! The report aggregate.

use serde::{Deserialize, Serialize};

use super::{Card, CronExpr, ExportSpec, Recipient};
use crate::{Error, Result};

/// A named job description: what to fetch, when to deliver, how to render
/// and where to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub group_id: Option<i64>,
    pub queries: Vec<Card>,
    pub evaluation: String,
    pub exports: Vec<ExportSpec>,
    pub recipients: Vec<Recipient>,
    pub active: bool,
}

impl Report {
    /// Check aggregate invariants.
    pub fn validate(&self) -> Result<()> {
        if self.exports.is_empty() {
            return Err(Error::malformed(&self.name, "report has no exports"));
        }
        if self.recipients.is_empty() {
            return Err(Error::malformed(&self.name, "report has no recipients"));
        }
        if self.queries.is_empty() && !self.exports.iter().all(ExportSpec::ignores_data) {
            return Err(Error::malformed(
                &self.name,
                "report has no queries and an export that needs data",
            ));
        }
        Ok(())
    }
}

/// An active schedule: the cron expression an event name fires on.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleUnit {
    pub cron_name: String,
    pub cron: CronExpr,
}

/// Binding of a report to an event name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBinding {
    pub cron_name: String,
    pub report_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExportFormat;

    fn report() -> Report {
        Report {
            name: "daily".into(),
            title: "Daily".into(),
            group_id: None,
            queries: vec![Card::new("u-1", "Q")],
            evaluation: "[*]".into(),
            exports: vec![ExportSpec::new(ExportFormat::Csv)],
            recipients: vec![Recipient::telegram(1, None)],
            active: true,
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(report().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_exports_and_recipients() {
        let mut r = report();
        r.exports.clear();
        assert!(matches!(r.validate(), Err(Error::MalformedReport { .. })));

        let mut r = report();
        r.recipients.clear();
        assert!(matches!(r.validate(), Err(Error::MalformedReport { .. })));
    }

    #[test]
    fn test_validate_dataless_template() {
        let mut r = report();
        r.queries.clear();
        assert!(r.validate().is_err());

        r.exports = vec![ExportSpec::new(ExportFormat::Text).with_template("hello")];
        assert!(r.validate().is_ok());
    }
}
