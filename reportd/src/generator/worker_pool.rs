//! Fixed pool of generator workers sharing one job channel.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use super::{Generator, JobOutcome};
use crate::domain::Report;

/// Generator workers consuming the job channel.
pub struct WorkerPool {
    workers: usize,
    tasks: TaskTracker,
}

impl WorkerPool {
    /// Spawn `workers` workers (0 selects 1). Workers exit when the job
    /// channel closes or `cancel` fires.
    pub fn start(
        generator: Arc<Generator>,
        jobs: mpsc::Receiver<Report>,
        workers: usize,
        cancel: CancellationToken,
    ) -> Self {
        let workers = workers.max(1);
        let jobs = Arc::new(Mutex::new(jobs));
        let tasks = TaskTracker::new();

        info!(workers, "Starting generator workers");
        for worker in 0..workers {
            let generator = generator.clone();
            let jobs = jobs.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                debug!(worker, "Generator worker started");
                loop {
                    let report = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        job = async { jobs.lock().await.recv().await } => match job {
                            Some(report) => report,
                            None => break,
                        },
                    };
                    process(worker, &generator, &cancel, &report).await;
                }
                debug!(worker, "Generator worker stopped");
            });
        }
        tasks.close();

        Self { workers, tasks }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Wait for every worker to exit.
    pub async fn wait(&self) {
        self.tasks.wait().await;
    }
}

async fn process(worker: usize, generator: &Generator, cancel: &CancellationToken, report: &Report) {
    let started = Instant::now();
    debug!(worker, report = %report.name, "Generating report");

    match generator.generate(cancel, report).await {
        Ok(JobOutcome::Delivered { artifacts, targets }) => info!(
            worker,
            report = %report.name,
            artifacts,
            targets,
            elapsed = ?started.elapsed(),
            "Report delivered"
        ),
        Ok(JobOutcome::Skipped) => debug!(worker, report = %report.name, "Report skipped"),
        Err(e) if e.is_fatal() => info!(worker, report = %report.name, error = %e, "Report generation stopped"),
        Err(e) => error!(
            worker,
            report = %report.name,
            error = %e,
            elapsed = ?started.elapsed(),
            "Report generation failed"
        ),
    }
}
