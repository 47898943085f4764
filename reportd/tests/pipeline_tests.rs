//! End-to-end runs of the report pipeline against in-process fakes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use report_render::{Attachment, Matrix, ParseMode, PdfRenderer, Row, RowValue, TemplateEngine};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use reportd::collector::Collector;
use reportd::config::{AppConfig, EvaluatorConfig};
use reportd::database::ReportRepository;
use reportd::database::models::ScheduleDbModel;
use reportd::delivery::{Chat, DeliveryStrategy, FileSink, Mail, MailSink, TelegramSink};
use reportd::domain::{
    Card, EmailRecipient, EventBinding, ExportFormat, ExportSpec, Recipient, Report, RetryPolicy,
};
use reportd::evaluator::Evaluator;
use reportd::event_creator::EventCreator;
use reportd::export::Exporter;
use reportd::fetcher::{Fetcher, with_retry};
use reportd::generator::{Generator, JobOutcome, WorkerPool};
use reportd::orchestrator::Orchestrator;
use reportd::scheduler::{Clock, Scheduler, control_channel};
use reportd::services::{PipelineDeps, ServiceContainer};
use reportd::{Error, Result};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Store {
    schedule: Mutex<Vec<(String, String)>>,
    events: Mutex<Vec<EventBinding>>,
    reports: Mutex<HashMap<String, Report>>,
}

impl Store {
    fn set_schedule(&self, units: &[(&str, &str)]) {
        *self.schedule.lock() = units
            .iter()
            .map(|(name, expr)| (name.to_string(), expr.to_string()))
            .collect();
    }

    fn add(&self, cron_name: &str, report: Report) {
        self.events.lock().push(EventBinding {
            cron_name: cron_name.to_string(),
            report_name: report.name.clone(),
        });
        self.reports.lock().insert(report.name.clone(), report);
    }
}

#[async_trait]
impl ReportRepository for Store {
    async fn load_schedule(&self) -> Result<Vec<ScheduleDbModel>> {
        Ok(self
            .schedule
            .lock()
            .iter()
            .map(|(cron_name, cron_expr)| ScheduleDbModel {
                cron_name: cron_name.clone(),
                cron_expr: cron_expr.clone(),
            })
            .collect())
    }

    async fn load_all_events(&self) -> Result<Vec<EventBinding>> {
        Ok(self.events.lock().clone())
    }

    async fn load_events_by_cron(&self, cron_name: &str) -> Result<Vec<EventBinding>> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.cron_name == cron_name)
            .cloned()
            .collect())
    }

    async fn load_reports_by_name(&self, name: &str) -> Result<Vec<Report>> {
        Ok(self.reports.lock().get(name).cloned().into_iter().collect())
    }

    async fn load_active_reports(&self) -> Result<Vec<Report>> {
        Ok(self
            .reports
            .lock()
            .values()
            .filter(|r| r.active)
            .cloned()
            .collect())
    }
}

/// Serves fixed rows per card; the first `failures` fetches fail with a
/// transport error and are retried with the default policy.
struct ScriptedFetcher {
    rows: HashMap<String, Vec<Row>>,
    failures: u32,
    calls: AtomicU32,
}

impl ScriptedFetcher {
    fn new(cards: &[(&str, Vec<Row>)]) -> Self {
        Self {
            rows: cards
                .iter()
                .map(|(uuid, rows)| (uuid.to_string(), rows.clone()))
                .collect(),
            failures: 0,
            calls: AtomicU32::new(0),
        }
    }

    fn flapping(mut self, failures: u32) -> Self {
        self.failures = failures;
        self
    }

    async fn attempt(&self, uuid: &str) -> Result<Vec<Row>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(Error::Transport("connection reset by peer".into()));
        }
        self.rows
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::Decode(format!("unknown card {uuid}")))
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, cancel: &CancellationToken, uuid: &str) -> Result<Vec<Row>> {
        with_retry(&RetryPolicy::default(), cancel, uuid, || self.attempt(uuid)).await
    }

    async fn fetch_matrix(&self, _cancel: &CancellationToken, uuid: &str) -> Result<Matrix> {
        Err(Error::Transport(format!("no matrix for {uuid}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Text {
        chat: i64,
        body: String,
        mode: ParseMode,
    },
    Upload {
        dir: String,
        files: Vec<String>,
    },
    Mail {
        to: Vec<String>,
        subject: String,
        attachments: Vec<String>,
    },
}

/// Records every sink call; `fail_mail` makes the mail sink fail.
#[derive(Default)]
struct Sinks {
    sent: Mutex<Vec<Sent>>,
    fail_mail: bool,
}

fn names(files: &[Attachment]) -> Vec<String> {
    files.iter().map(|f| f.name.clone()).collect()
}

#[async_trait]
impl TelegramSink for Sinks {
    async fn send_text(&self, chat: Chat, text: &str, parse_mode: ParseMode) -> Result<()> {
        self.sent.lock().push(Sent::Text {
            chat: chat.chat_id,
            body: text.to_string(),
            mode: parse_mode,
        });
        Ok(())
    }

    async fn send_album(&self, _chat: Chat, _images: &[Attachment]) -> Result<()> {
        Ok(())
    }

    async fn send_documents(&self, _chat: Chat, _files: &[Attachment]) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl FileSink for Sinks {
    async fn upload(
        &self,
        _cancel: &CancellationToken,
        remote_dir: &str,
        files: &[Attachment],
    ) -> Result<()> {
        self.sent.lock().push(Sent::Upload {
            dir: remote_dir.to_string(),
            files: names(files),
        });
        Ok(())
    }
}

#[async_trait]
impl MailSink for Sinks {
    async fn send(&self, mail: &Mail) -> Result<()> {
        self.sent.lock().push(Sent::Mail {
            to: mail.to.clone(),
            subject: mail.subject.clone(),
            attachments: names(&mail.attachments),
        });
        if self.fail_mail {
            return Err(Error::delivery("smtp", "mail server down"));
        }
        Ok(())
    }
}

fn strategy(sinks: &Arc<Sinks>) -> DeliveryStrategy {
    DeliveryStrategy::new()
        .with_telegram(sinks.clone())
        .with_files(sinks.clone())
        .with_mail(sinks.clone())
}

fn generator(fetcher: ScriptedFetcher, sinks: &Arc<Sinks>) -> Generator {
    let templates = Arc::new(TemplateEngine::new());
    Generator::new(
        Collector::new(Arc::new(fetcher), 4),
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
        Arc::new(strategy(sinks)),
        Duration::from_secs(5 * 60),
    )
}

fn row(cells: &[(&str, RowValue)]) -> Row {
    cells
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn report(name: &str, evaluation: &str, exports: Vec<ExportSpec>, recipients: Vec<Recipient>) -> Report {
    Report {
        name: name.to_string(),
        title: name.to_uppercase(),
        group_id: None,
        queries: vec![Card::new("q-1", "Q")],
        evaluation: evaluation.to_string(),
        exports,
        recipients,
        active: true,
    }
}

fn text_export() -> ExportSpec {
    ExportSpec::new(ExportFormat::Text).with_template("value: {{ rows[0].n }}")
}

fn n_rows() -> Vec<(&'static str, Vec<Row>)> {
    vec![("q-1", vec![row(&[("n", RowValue::Int(3))])])]
}

// ---------------------------------------------------------------------------
// Single jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn always_false_predicate_sends_nothing() {
    let sinks = Arc::new(Sinks::default());
    let fetcher = ScriptedFetcher::new(&[("q-1", vec![row(&[("x", RowValue::Int(0))])])]);
    let generator = generator(fetcher, &sinks);

    let outcome = generator
        .generate(
            &CancellationToken::new(),
            &report("r", "[!*]", vec![text_export()], vec![Recipient::telegram(42, None)]),
        )
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::Skipped);
    assert!(sinks.sent.lock().is_empty());
}

#[tokio::test]
async fn text_report_reaches_telegram() {
    let sinks = Arc::new(Sinks::default());
    let generator = generator(ScriptedFetcher::new(&n_rows()), &sinks);

    let outcome = generator
        .generate(
            &CancellationToken::new(),
            &report(
                "r",
                "size(report.Q) == 1 && report.Q[0].n == 3",
                vec![text_export()],
                vec![Recipient::telegram(42, None)],
            ),
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
    assert_eq!(
        *sinks.sent.lock(),
        vec![Sent::Text {
            chat: 42,
            body: "value: 3".to_string(),
            mode: ParseMode::Html,
        }]
    );
}

#[tokio::test]
async fn csv_and_xlsx_reach_file_server_and_mail() {
    let sinks = Arc::new(Sinks::default());
    let fetcher = ScriptedFetcher::new(&[(
        "q-1",
        vec![
            row(&[("a", RowValue::Int(1)), ("b", RowValue::String("x".into()))]),
            row(&[("a", RowValue::Int(2)), ("b", RowValue::String("y".into()))]),
        ],
    )]);
    let generator = generator(fetcher, &sinks);

    let report = report(
        "r",
        "[*]",
        vec![
            ExportSpec::new(ExportFormat::Csv).with_filename("r.csv"),
            ExportSpec::new(ExportFormat::Xlsx)
                .with_filename("r.xlsx")
                .with_order("Q", &["a", "b"]),
        ],
        vec![
            Recipient::file_server("/reports"),
            Recipient::Email(EmailRecipient {
                to: vec!["u@x".to_string()],
                cc: vec![],
                subject_template: r#"R {{ now() | subDays(1) | date("2006-01-02") }}"#.to_string(),
                body_template: None,
            }),
        ],
    );

    let outcome = generator
        .generate(&CancellationToken::new(), &report)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Delivered {
            artifacts: 2,
            targets: 2
        }
    );

    let yesterday = (chrono::Local::now() - chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();
    let sent = sinks.sent.lock();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[0],
        Sent::Upload {
            dir: "/reports".to_string(),
            files: vec!["r.csv".to_string(), "r.xlsx".to_string()],
        }
    );
    match &sent[1] {
        Sent::Mail {
            to,
            subject,
            attachments,
        } => {
            assert_eq!(to, &["u@x".to_string()]);
            assert!(subject.starts_with("R "));
            assert!(subject.contains(&yesterday), "subject {subject:?}");
            assert_eq!(attachments, &["r.csv".to_string(), "r.xlsx".to_string()]);
        }
        other => panic!("expected mail, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn transient_fetch_failures_are_retried() {
    let sinks = Arc::new(Sinks::default());
    let generator = generator(ScriptedFetcher::new(&n_rows()).flapping(2), &sinks);

    let started = tokio::time::Instant::now();
    let outcome = generator
        .generate(
            &CancellationToken::new(),
            &report("r", "[*]", vec![text_export()], vec![Recipient::telegram(42, None)]),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, JobOutcome::Delivered { .. }));
    // 15 s after the first failure, 45 s after the second.
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert_eq!(sinks.sent.lock().len(), 1);
}

#[tokio::test]
async fn failing_recipient_does_not_stop_the_others() {
    let sinks = Arc::new(Sinks {
        fail_mail: true,
        ..Default::default()
    });
    let generator = generator(ScriptedFetcher::new(&n_rows()), &sinks);

    let err = generator
        .generate(
            &CancellationToken::new(),
            &report(
                "r",
                "[*]",
                vec![text_export()],
                vec![
                    Recipient::telegram(42, None),
                    Recipient::Email(EmailRecipient {
                        to: vec!["u@x".to_string()],
                        cc: vec![],
                        subject_template: "Report".to_string(),
                        body_template: None,
                    }),
                ],
            ),
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("mail server down"), "{err}");
    let sent = sinks.sent.lock();
    assert_eq!(sent.len(), 2);
    assert!(matches!(&sent[0], Sent::Text { chat: 42, .. }));
    assert!(matches!(&sent[1], Sent::Mail { .. }));
}

// ---------------------------------------------------------------------------
// Whole pipeline
// ---------------------------------------------------------------------------

/// Wall clock that follows tokio's paused time.
struct VirtualClock {
    base: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now() - self.origin;
        self.base + chrono::Duration::from_std(elapsed).unwrap_or_default()
    }
}

fn chat_ids(sinks: &Sinks) -> Vec<i64> {
    sinks
        .sent
        .lock()
        .iter()
        .filter_map(|s| match s {
            Sent::Text { chat, .. } => Some(*chat),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn restart_swaps_the_running_schedule() {
    let store = Arc::new(Store::default());
    store.set_schedule(&[("minutely", "* * * * *")]);
    store.add(
        "minutely",
        report("first", "[*]", vec![text_export()], vec![Recipient::telegram(1, None)]),
    );
    store.add(
        "other",
        report("second", "[*]", vec![text_export()], vec![Recipient::telegram(2, None)]),
    );

    let sinks = Arc::new(Sinks::default());
    let generator = Arc::new(generator(ScriptedFetcher::new(&n_rows()), &sinks));
    let repo: Arc<dyn ReportRepository> = store.clone();
    let cancel = CancellationToken::new();
    let drain = CancellationToken::new();

    let (cron_tx, cron_rx) = mpsc::channel(15);
    let (name_tx, name_rx) = mpsc::channel(15);
    let (job_tx, job_rx) = mpsc::channel(15);
    let (handle, control) = control_channel(4);

    let event_creator = Arc::new(EventCreator::new(repo.clone(), Duration::from_secs(15)));
    let orchestrator = Arc::new(Orchestrator::new(repo.clone(), 5));
    let scheduler = Scheduler::new(repo, cron_tx, chrono_tz::UTC, cancel.clone())
        .with_clock(Arc::new(VirtualClock {
            base: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 30).unwrap(),
            origin: tokio::time::Instant::now(),
        }))
        .with_reload_hook(event_creator.clone())
        .with_reload_hook(orchestrator.clone());

    let scheduler_task = tokio::spawn(scheduler.run(control));
    let creator_task = tokio::spawn(event_creator.clone().run(cron_rx, name_tx, drain.clone()));
    let orchestrator_task = tokio::spawn(orchestrator.clone().run(name_rx, job_tx, drain.clone()));
    let workers = WorkerPool::start(generator, job_rx, 2, drain.clone());

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(chat_ids(&sinks), [1]);

    store.set_schedule(&[("other", "* * * * *")]);
    handle.restart().await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(chat_ids(&sinks), [1, 2]);

    // Stopping the scheduler closes every downstream stage in turn.
    cancel.cancel();
    scheduler_task.await.unwrap();
    creator_task.await.unwrap();
    orchestrator_task.await.unwrap();
    workers.wait().await;
    assert_eq!(chat_ids(&sinks), [1, 2]);
}

#[tokio::test]
async fn container_starts_and_drains_on_shutdown() {
    let store = Arc::new(Store::default());
    store.set_schedule(&[("nightly", "0 2 * * *")]);
    let sinks = Arc::new(Sinks::default());

    let deps = PipelineDeps {
        repo: store,
        fetcher: Arc::new(ScriptedFetcher::new(&n_rows())),
        delivery: Arc::new(strategy(&sinks)),
    };
    let mut container =
        ServiceContainer::with_deps(AppConfig::default(), deps, CancellationToken::new()).unwrap();
    container.start().unwrap();
    assert!(container.start().is_err());

    let handle = container.scheduler().unwrap();
    handle.restart().await.unwrap();

    container
        .shutdown_with_timeout(Duration::from_secs(5))
        .await;
    assert!(container.is_shutting_down());
    assert!(handle.stop().await.is_err());
    assert!(sinks.sent.lock().is_empty());
}
