//! One report invocation: collect, evaluate, export, target, deliver.

use report_render::{FetchResult, ReportData};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Generator;
use crate::delivery::resolve_targets;
use crate::domain::Report;
use crate::export::{ExportInput, Exporter};
use crate::{Error, Result};

/// How a job ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Artifacts went out to every resolved target.
    Delivered { artifacts: usize, targets: usize },
    /// The predicate was false; nothing was rendered or sent.
    Skipped,
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Canceled)
    } else {
        Ok(())
    }
}

impl Generator {
    pub(super) async fn run_job(
        &self,
        cancel: &CancellationToken,
        report: &Report,
    ) -> Result<JobOutcome> {
        ensure_live(cancel)?;
        let data = if report.queries.is_empty() {
            FetchResult::new()
        } else {
            self.collector
                .collect(cancel, &report.queries)
                .await?
                .into_result()?
        };
        debug!(report = %report.name, cards = data.len(), "Collected");

        ensure_live(cancel)?;
        if !self
            .evaluator
            .evaluate(cancel, &data, &report.evaluation)
            .await?
        {
            info!(report = %report.name, "negative evaluation, skipping delivery");
            return Ok(JobOutcome::Skipped);
        }

        ensure_live(cancel)?;
        let matrices = if Exporter::needs_matrices(report) && !report.queries.is_empty() {
            let collected = self.collector.collect_matrices(cancel, &report.queries).await?;
            if let Some(e) = &collected.error {
                warn!(report = %report.name, error = %e, "Some card matrices failed, images fall back to rows");
            }
            collected.data
        } else {
            Vec::new()
        };

        let input = ExportInput {
            report,
            data: &data,
            matrices: &matrices,
        };
        let mut artifacts: Vec<ReportData> = Vec::with_capacity(report.exports.len());
        for spec in &report.exports {
            ensure_live(cancel)?;
            match self.exporter.export(&input, spec).await {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => {
                    warn!(report = %report.name, format = %spec.format, error = %e, "Export failed, skipping");
                }
            }
        }
        if artifacts.is_empty() {
            return Err(Error::Other(format!(
                "every export of report {} failed",
                report.name
            )));
        }

        let (targets, target_error) = resolve_targets(&self.templates, report);
        if let Some(e) = target_error {
            warn!(report = %report.name, error = %e, "Some recipients could not be resolved");
        }
        if targets.is_empty() {
            return Err(Error::NoTargets(report.name.clone()));
        }

        ensure_live(cancel)?;
        self.delivery.send(cancel, &targets, &artifacts).await?;

        Ok(JobOutcome::Delivered {
            artifacts: artifacts.len(),
            targets: targets.len(),
        })
    }
}
