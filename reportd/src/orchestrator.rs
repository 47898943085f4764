//! Hydration of report names into report aggregates.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_ORCHESTRATOR_CACHE;
use crate::database::ReportRepository;
use crate::domain::Report;
use crate::scheduler::Reload;
use crate::Result;

/// Loads reports by name through a small LRU and queues them for generation.
pub struct Orchestrator {
    repo: Arc<dyn ReportRepository>,
    cache: Mutex<LruCache<String, Arc<[Report]>>>,
}

impl Orchestrator {
    /// `cache_size == 0` selects the default of 5.
    pub fn new(repo: Arc<dyn ReportRepository>, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size)
            .or(NonZeroUsize::new(DEFAULT_ORCHESTRATOR_CACHE))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            repo,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Fill the cache from one bulk load of every active report. Names past
    /// the cache capacity are left to the miss path.
    pub async fn warm(&self) -> Result<usize> {
        let mut grouped: Vec<(String, Vec<Report>)> = Vec::new();
        for report in self.repo.load_active_reports().await? {
            match grouped.iter_mut().find(|(name, _)| *name == report.name) {
                Some((_, reports)) => reports.push(report),
                None => grouped.push((report.name.clone(), vec![report])),
            }
        }

        let mut cache = self.cache.lock();
        let capacity = cache.cap().get();
        let names = grouped.len();
        for (name, reports) in grouped.into_iter().take(capacity) {
            cache.put(name, reports.into());
        }
        info!(reports = names, cached = cache.len(), "Report cache warmed");
        Ok(names)
    }

    /// Active, valid reports stored under `name`.
    pub async fn reports(&self, name: &str) -> Result<Vec<Report>> {
        let cached = self.cache.lock().get(name).cloned();
        let loaded = match cached {
            Some(reports) => {
                debug!(report = %name, "Report cache hit");
                reports
            }
            None => {
                debug!(report = %name, "Report cache miss");
                let reports: Arc<[Report]> = self.repo.load_reports_by_name(name).await?.into();
                self.cache.lock().put(name.to_string(), reports.clone());
                reports
            }
        };

        Ok(loaded
            .iter()
            .filter(|report| {
                if !report.active {
                    debug!(report = %report.name, "Skipping inactive report");
                    return false;
                }
                match report.validate() {
                    Ok(()) => true,
                    Err(e) => {
                        error!(report = %report.name, error = %e, "Skipping malformed report");
                        false
                    }
                }
            })
            .cloned()
            .collect())
    }

    /// Consume report names until `input` closes or `cancel` fires.
    ///
    /// `out` is dropped on return, which closes the generator's input.
    pub async fn run(
        self: Arc<Self>,
        mut input: mpsc::Receiver<String>,
        out: mpsc::Sender<Report>,
        cancel: CancellationToken,
    ) {
        let warmed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            warmed = self.warm() => warmed,
        };
        if let Err(e) = warmed {
            warn!(error = %e, "Report cache warm-up failed, loading on demand");
        }

        loop {
            let name = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = input.recv() => match received {
                    Some(name) => name,
                    None => break,
                },
            };

            let reports = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                loaded = self.reports(&name) => loaded,
            };
            let reports = match reports {
                Ok(reports) if reports.is_empty() => {
                    warn!(report = %name, "No active report with this name");
                    continue;
                }
                Ok(reports) => reports,
                Err(e) => {
                    error!(report = %name, error = %e, "Failed to load report");
                    continue;
                }
            };

            for report in reports {
                debug!(report = %report.name, "Queueing report");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    sent = out.send(report) => if sent.is_err() {
                        warn!("Job channel closed, orchestrator stopping");
                        return;
                    },
                }
            }
        }
        debug!("Orchestrator stopped");
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}

impl Reload for Orchestrator {
    fn reload(&self) {
        self.cache.lock().clear();
        info!("Report cache cleared");
    }
}
