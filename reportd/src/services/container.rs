//! Service container for dependency injection.
//!
//! The ServiceContainer builds every pipeline stage, connects them with
//! bounded channels and manages their lifecycle:
//!
//! ```text
//! Scheduler ──cron name──▶ EventCreator ──report name──▶ Orchestrator ──Report──▶ WorkerPool
//! ```
//!
//! Each stage owns the sending half of its outbound channel. Shutdown stops
//! the scheduler and lets the closure ripple downstream, so every stage
//! drains what it already holds before exiting.

use std::sync::Arc;
use std::time::Duration;

use report_render::{PdfRenderer, TableImageRenderer, TableStyle, TemplateEngine};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::collector::Collector;
use crate::config::{AppConfig, RenderConfig};
use crate::database::{ReportRepository, SqlxReportRepository};
use crate::delivery::smb::{PavaoConnector, SmbPolicy, SmbSink};
use crate::delivery::smtp::SmtpMailer;
use crate::delivery::telegram::TelegramBot;
use crate::delivery::{Delivery, DeliveryStrategy};
use crate::evaluator::Evaluator;
use crate::event_creator::EventCreator;
use crate::export::Exporter;
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::generator::{Generator, WorkerPool};
use crate::orchestrator::Orchestrator;
use crate::scheduler::{Scheduler, SchedulerHandle, control_channel};
use crate::{Error, Result};

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound of one `wkhtmltopdf` run.
const PDF_TIMEOUT: Duration = Duration::from_secs(120);

/// Capacity of the scheduler control channel.
const CONTROL_CAPACITY: usize = 8;

/// Externally provided collaborators of the pipeline.
pub struct PipelineDeps {
    pub repo: Arc<dyn ReportRepository>,
    pub fetcher: Arc<dyn Fetcher>,
    pub delivery: Arc<dyn Delivery>,
}

/// Service container holding all pipeline services.
pub struct ServiceContainer {
    config: AppConfig,
    pool: Option<SqlitePool>,
    repo: Arc<dyn ReportRepository>,
    event_creator: Arc<EventCreator>,
    orchestrator: Arc<Orchestrator>,
    generator: Arc<Generator>,
    smb: Option<Arc<SmbSink>>,
    scheduler_handle: Option<SchedulerHandle>,
    workers: Option<WorkerPool>,
    /// Stops the scheduler; the rest of the pipeline follows by channel
    /// closure.
    cancellation_token: CancellationToken,
    /// Aborts in-flight work when a graceful drain takes too long.
    drain_token: CancellationToken,
    stages: TaskTracker,
}

impl ServiceContainer {
    /// Build the production pipeline on top of `pool`.
    pub async fn new(pool: SqlitePool, config: AppConfig) -> Result<Self> {
        info!("Initializing service container");
        let cancellation_token = CancellationToken::new();

        let repo: Arc<dyn ReportRepository> = Arc::new(SqlxReportRepository::new(pool.clone()));
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.fetch)?);

        let mut strategy = DeliveryStrategy::new();
        if config.telegram.token.is_empty() {
            warn!("Telegram token not set, Telegram recipients will fail");
        } else {
            strategy = strategy.with_telegram(Arc::new(TelegramBot::new(&config.telegram)?));
        }
        if config.smtp.is_configured() {
            strategy = strategy.with_mail(Arc::new(SmtpMailer::new(config.smtp.clone())?));
        } else {
            warn!("SMTP not configured, email recipients will fail");
        }

        let mut smb = None;
        if config.smb.active {
            let connector = Arc::new(PavaoConnector::new(config.smb.clone()));
            match SmbSink::connect(
                connector,
                SmbPolicy::from(&config.smb),
                cancellation_token.child_token(),
            )
            .await
            {
                Ok(sink) => {
                    let sink = Arc::new(sink);
                    strategy = strategy.with_files(sink.clone());
                    smb = Some(sink);
                }
                Err(e) => warn!(error = %e, "SMB unavailable, file server recipients will fail"),
            }
        }

        let deps = PipelineDeps {
            repo,
            fetcher,
            delivery: Arc::new(strategy),
        };
        let mut container = Self::with_deps(config, deps, cancellation_token)?;
        container.pool = Some(pool);
        container.smb = smb;
        Ok(container)
    }

    /// Build the pipeline around the given collaborators.
    pub fn with_deps(
        config: AppConfig,
        deps: PipelineDeps,
        cancellation_token: CancellationToken,
    ) -> Result<Self> {
        let templates = Arc::new(TemplateEngine::new());
        let exporter = Arc::new(Exporter::new(
            templates.clone(),
            table_renderer(&config.render)?,
            PdfRenderer::new(config.render.wkhtmltopdf_path.clone(), PDF_TIMEOUT),
        ));

        let generator = Arc::new(Generator::new(
            Collector::new(deps.fetcher, config.collector.parallel),
            Arc::new(Evaluator::new(&config.evaluator)),
            exporter,
            templates,
            deps.delivery,
            config.job.timeout,
        ));
        let event_creator = Arc::new(EventCreator::new(
            deps.repo.clone(),
            config.event.load_timeout,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            deps.repo.clone(),
            config.orchestrator.cache_size,
        ));

        Ok(Self {
            config,
            pool: None,
            repo: deps.repo,
            event_creator,
            orchestrator,
            generator,
            smb: None,
            scheduler_handle: None,
            workers: None,
            cancellation_token,
            drain_token: CancellationToken::new(),
            stages: TaskTracker::new(),
        })
    }

    /// Connect the channels and spawn every stage.
    pub fn start(&mut self) -> Result<()> {
        if self.workers.is_some() {
            return Err(Error::Other("pipeline already started".to_string()));
        }
        let buffer = self.config.scheduler.buffer.max(1);

        let (cron_tx, cron_rx) = mpsc::channel::<String>(buffer);
        let (name_tx, name_rx) = mpsc::channel::<String>(buffer);
        let (job_tx, job_rx) = mpsc::channel(buffer);
        let (handle, control_rx) = control_channel(CONTROL_CAPACITY);

        let scheduler = Scheduler::new(
            self.repo.clone(),
            cron_tx,
            self.config.scheduler.timezone,
            self.cancellation_token.clone(),
        )
        .with_reload_hook(self.event_creator.clone())
        .with_reload_hook(self.orchestrator.clone());

        self.stages.spawn(scheduler.run(control_rx));
        self.stages.spawn(
            self.event_creator
                .clone()
                .run(cron_rx, name_tx, self.drain_token.clone()),
        );
        self.stages.spawn(
            self.orchestrator
                .clone()
                .run(name_rx, job_tx, self.drain_token.clone()),
        );
        self.workers = Some(WorkerPool::start(
            self.generator.clone(),
            job_rx,
            self.config.generator.workers,
            self.drain_token.clone(),
        ));
        self.scheduler_handle = Some(handle);

        info!(
            buffer,
            workers = self.config.generator.workers.max(1),
            "Report pipeline started"
        );
        Ok(())
    }

    /// Control handle of the running scheduler.
    pub fn scheduler(&self) -> Option<SchedulerHandle> {
        self.scheduler_handle.clone()
    }

    pub fn event_creator(&self) -> &Arc<EventCreator> {
        &self.event_creator
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Get the cancellation token for this container.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown all services gracefully with a custom timeout.
    ///
    /// Work still running when `timeout` expires is cancelled.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) {
        info!(timeout = ?timeout, "Shutting down services");
        self.cancellation_token.cancel();
        self.stages.close();

        let drained = tokio::time::timeout(timeout, async {
            self.stages.wait().await;
            if let Some(workers) = &self.workers {
                workers.wait().await;
            }
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown timeout reached, cancelling in-flight reports");
            self.drain_token.cancel();
            self.stages.wait().await;
            if let Some(workers) = &self.workers {
                workers.wait().await;
            }
        }
        self.drain_token.cancel();

        if let Some(smb) = &self.smb {
            info!("Closing SMB session...");
            smb.close().await;
        }
        if let Some(pool) = &self.pool {
            info!("Closing database pool...");
            pool.close().await;
        }
        info!("All services shut down");
    }
}

/// Table image renderer, if fonts are configured.
fn table_renderer(config: &RenderConfig) -> Result<Option<Arc<TableImageRenderer>>> {
    let Some(regular) = &config.font_path else {
        return Ok(None);
    };
    let bold = config.bold_font_path.as_ref().unwrap_or(regular);
    let style = TableStyle {
        font_size: config.font_size,
        ..TableStyle::default()
    };
    let renderer = TableImageRenderer::from_files(regular, bold, style)?;
    Ok(Some(Arc::new(renderer)))
}
