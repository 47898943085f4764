//! Report generation.
//!
//! A [`WorkerPool`] of generator workers pulls reports off the job channel
//! and runs each one through [`Generator::generate`] under its own deadline.

mod job;
mod worker_pool;

pub use job::JobOutcome;
pub use worker_pool::WorkerPool;

use std::sync::Arc;
use std::time::Duration;

use report_render::TemplateEngine;
use tokio_util::sync::CancellationToken;

use crate::collector::Collector;
use crate::delivery::Delivery;
use crate::domain::Report;
use crate::evaluator::Evaluator;
use crate::export::Exporter;
use crate::{Error, Result};

/// Everything one job needs, shared by every worker.
pub struct Generator {
    collector: Collector,
    evaluator: Arc<Evaluator>,
    exporter: Arc<Exporter>,
    templates: Arc<TemplateEngine>,
    delivery: Arc<dyn Delivery>,
    job_timeout: Duration,
}

impl Generator {
    pub fn new(
        collector: Collector,
        evaluator: Arc<Evaluator>,
        exporter: Arc<Exporter>,
        templates: Arc<TemplateEngine>,
        delivery: Arc<dyn Delivery>,
        job_timeout: Duration,
    ) -> Self {
        Self {
            collector,
            evaluator,
            exporter,
            templates,
            delivery,
            job_timeout,
        }
    }

    /// Run one report under the job deadline.
    ///
    /// The job gets a child of `cancel`; it is cancelled when the job ends,
    /// so nothing the job started outlives it.
    pub async fn generate(&self, cancel: &CancellationToken, report: &Report) -> Result<JobOutcome> {
        let job_token = cancel.child_token();
        let _guard = job_token.clone().drop_guard();

        match tokio::time::timeout(self.job_timeout, self.run_job(&job_token, report)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Timeout(format!(
                "report {} exceeded {}",
                report.name,
                humantime::format_duration(self.job_timeout)
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::EvaluatorConfig;
    use crate::delivery::Target;
    use crate::domain::{Card, ExportFormat, ExportSpec, Recipient};
    use crate::fetcher::Fetcher;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use report_render::{Matrix, PdfRenderer, ReportData, Row, RowValue};

    pub(crate) struct StaticFetcher {
        pub latency: Duration,
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, _cancel: &CancellationToken, _uuid: &str) -> Result<Vec<Row>> {
            tokio::time::sleep(self.latency).await;
            Ok(vec![Row::from([("n".to_string(), RowValue::Int(3))])])
        }

        async fn fetch_matrix(&self, _cancel: &CancellationToken, _uuid: &str) -> Result<Matrix> {
            Ok(vec![vec!["n".into()], vec!["3".into()]])
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingDelivery {
        pub sent: Mutex<Vec<(Vec<Target>, Vec<ReportData>)>>,
    }

    #[async_trait]
    impl Delivery for RecordingDelivery {
        async fn send(
            &self,
            _cancel: &CancellationToken,
            targets: &[Target],
            artifacts: &[ReportData],
        ) -> Result<()> {
            self.sent.lock().push((targets.to_vec(), artifacts.to_vec()));
            Ok(())
        }
    }

    pub(crate) fn generator(latency: Duration, delivery: Arc<RecordingDelivery>) -> Generator {
        let templates = Arc::new(TemplateEngine::new());
        Generator::new(
            Collector::new(Arc::new(StaticFetcher { latency }), 4),
            Arc::new(Evaluator::new(&EvaluatorConfig {
                cache_size: 15,
                timeout: Duration::from_secs(10),
            })),
            Arc::new(Exporter::new(
                templates.clone(),
                None,
                PdfRenderer::new("wkhtmltopdf", Duration::from_secs(60)),
            )),
            templates,
            delivery,
            Duration::from_secs(300),
        )
    }

    fn report(evaluation: &str, recipients: Vec<Recipient>) -> Report {
        Report {
            name: "daily".into(),
            title: "Daily".into(),
            group_id: None,
            queries: vec![Card::new("u-1", "Q")],
            evaluation: evaluation.into(),
            exports: vec![
                ExportSpec::new(ExportFormat::Text)
                    .with_template("value: {{ rows[0].n }}"),
                // No template: fails and is skipped.
                ExportSpec::new(ExportFormat::Markdown),
            ],
            recipients,
            active: true,
        }
    }

    #[tokio::test]
    async fn test_delivers_rendered_text() {
        let delivery = Arc::new(RecordingDelivery::default());
        let generator = generator(Duration::ZERO, delivery.clone());

        let outcome = generator
            .generate(
                &CancellationToken::new(),
                &report("size(report.Q) == 1", vec![Recipient::telegram(42, None)]),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            JobOutcome::Delivered {
                artifacts: 1,
                targets: 1
            }
        );
        let sent = delivery.sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0].1[0],
            ReportData::Text { body, .. } if body == "value: 3"
        ));
    }

    #[tokio::test]
    async fn test_negative_evaluation_skips_delivery() {
        let delivery = Arc::new(RecordingDelivery::default());
        let generator = generator(Duration::ZERO, delivery.clone());

        let outcome = generator
            .generate(
                &CancellationToken::new(),
                &report("[!*]", vec![Recipient::telegram(42, None)]),
            )
            .await
            .unwrap();

        assert_eq!(outcome, JobOutcome::Skipped);
        assert!(delivery.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_no_targets() {
        let delivery = Arc::new(RecordingDelivery::default());
        let generator = generator(Duration::ZERO, delivery.clone());

        let err = generator
            .generate(
                &CancellationToken::new(),
                &report("[*]", vec![Recipient::telegram(0, None)]),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoTargets(name) if name == "daily"));
        assert!(delivery.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_deadline() {
        let delivery = Arc::new(RecordingDelivery::default());
        let generator = generator(Duration::from_secs(600), delivery.clone());

        let err = generator
            .generate(
                &CancellationToken::new(),
                &report("[*]", vec![Recipient::telegram(42, None)]),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert!(delivery.sent.lock().is_empty());
    }
}
