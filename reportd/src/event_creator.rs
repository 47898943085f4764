//! Expansion of fired event names into report names.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::database::ReportRepository;
use crate::domain::EventBinding;
use crate::scheduler::Reload;
use crate::{Error, Result};

/// Maps event names to the reports bound to them, backed by a warm cache.
pub struct EventCreator {
    repo: Arc<dyn ReportRepository>,
    cache: RwLock<HashMap<String, Vec<String>>>,
    load_timeout: Duration,
}

impl EventCreator {
    pub fn new(repo: Arc<dyn ReportRepository>, load_timeout: Duration) -> Self {
        Self {
            repo,
            cache: RwLock::new(HashMap::new()),
            load_timeout,
        }
    }

    /// Replace the cache with every binding in storage.
    pub async fn warm(&self, cancel: &CancellationToken) -> Result<usize> {
        let bindings = self
            .bounded(cancel, "load_all_events", self.repo.load_all_events())
            .await?;

        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        for EventBinding {
            cron_name,
            report_name,
        } in bindings
        {
            grouped.entry(cron_name).or_default().push(report_name);
        }

        let events = grouped.len();
        *self.cache.write() = grouped;
        info!(events, "Event cache warmed");
        Ok(events)
    }

    /// Report names bound to `cron_name`. Misses are loaded and cached,
    /// including empty results.
    pub async fn report_names(
        &self,
        cancel: &CancellationToken,
        cron_name: &str,
    ) -> Result<Vec<String>> {
        let cached = self.cache.read().get(cron_name).cloned();
        if let Some(names) = cached {
            debug!(cron = %cron_name, reports = names.len(), "Event cache hit");
            return Ok(names);
        }

        debug!(cron = %cron_name, "Event cache miss");
        let names: Vec<String> = self
            .bounded(
                cancel,
                "load_events_by_cron",
                self.repo.load_events_by_cron(cron_name),
            )
            .await?
            .into_iter()
            .map(|b| b.report_name)
            .collect();

        self.cache
            .write()
            .insert(cron_name.to_string(), names.clone());
        Ok(names)
    }

    /// Run a repository load under the load timeout and `cancel`.
    async fn bounded<T>(
        &self,
        cancel: &CancellationToken,
        what: &str,
        load: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Canceled),
            outcome = tokio::time::timeout(self.load_timeout, load) => outcome.unwrap_or_else(|_| {
                Err(Error::Timeout(format!(
                    "{what} exceeded {}",
                    humantime::format_duration(self.load_timeout)
                )))
            }),
        }
    }

    /// Consume event names until `input` closes or `cancel` fires.
    ///
    /// `out` is dropped on return, which closes the next stage's input.
    pub async fn run(
        self: Arc<Self>,
        mut input: mpsc::Receiver<String>,
        out: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) {
        if let Err(e) = self.warm(&cancel).await {
            warn!(error = %e, "Event cache warm-up failed, loading on demand");
        }

        loop {
            let cron_name = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = input.recv() => match received {
                    Some(name) => name,
                    None => break,
                },
            };

            let names = match self.report_names(&cancel, &cron_name).await {
                Ok(names) => names,
                Err(Error::Canceled) => break,
                Err(e) => {
                    error!(cron = %cron_name, error = %e, "Failed to resolve event");
                    continue;
                }
            };
            if names.is_empty() {
                debug!(cron = %cron_name, "No reports bound to event");
            }

            for name in names {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    sent = out.send(name) => if sent.is_err() {
                        warn!("Report channel closed, event creator stopping");
                        return;
                    },
                }
            }
        }
        debug!("Event creator stopped");
    }
}

impl Reload for EventCreator {
    fn reload(&self) {
        self.cache.write().clear();
        info!("Event cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::memory::MemoryReportRepository;

    fn creator(repo: &Arc<MemoryReportRepository>) -> EventCreator {
        EventCreator::new(repo.clone(), Duration::from_secs(15))
    }

    #[tokio::test]
    async fn test_warm_cache_serves_lookups() {
        let repo = Arc::new(MemoryReportRepository::default());
        repo.bind("daily", "sales");
        repo.bind("daily", "stock");
        repo.bind("weekly", "summary");
        let creator = creator(&repo);
        let cancel = CancellationToken::new();

        assert_eq!(creator.warm(&cancel).await.unwrap(), 2);
        assert_eq!(
            creator.report_names(&cancel, "daily").await.unwrap(),
            vec!["sales", "stock"]
        );
        assert_eq!(repo.count("load_events_by_cron"), 0);
    }

    #[tokio::test]
    async fn test_miss_loads_once() {
        let repo = Arc::new(MemoryReportRepository::default());
        repo.bind("daily", "sales");
        let creator = creator(&repo);
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            assert_eq!(creator.report_names(&cancel, "daily").await.unwrap(), vec!["sales"]);
            assert!(creator.report_names(&cancel, "nothing").await.unwrap().is_empty());
        }
        assert_eq!(repo.count("load_events_by_cron"), 2);
    }

    #[tokio::test]
    async fn test_reload_clears_cache() {
        let repo = Arc::new(MemoryReportRepository::default());
        repo.bind("daily", "sales");
        let creator = creator(&repo);
        let cancel = CancellationToken::new();
        creator.warm(&cancel).await.unwrap();

        repo.bind("daily", "stock");
        creator.reload();

        assert_eq!(
            creator.report_names(&cancel, "daily").await.unwrap(),
            vec!["sales", "stock"]
        );
        assert_eq!(repo.count("load_events_by_cron"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_timeout() {
        let repo = Arc::new(MemoryReportRepository {
            latency: Some(Duration::from_secs(20)),
            ..Default::default()
        });
        let creator = creator(&repo);

        let err = creator
            .report_names(&CancellationToken::new(), "daily")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_run_forwards_names_and_closes() {
        let repo = Arc::new(MemoryReportRepository::default());
        repo.bind("daily", "sales");
        repo.bind("daily", "stock");
        let creator = Arc::new(creator(&repo));
        let (in_tx, in_rx) = mpsc::channel(15);
        let (out_tx, mut out_rx) = mpsc::channel(15);

        let task = tokio::spawn(creator.run(in_rx, out_tx, CancellationToken::new()));
        in_tx.send("daily".to_string()).await.unwrap();
        in_tx.send("unknown".to_string()).await.unwrap();
        drop(in_tx);
        task.await.unwrap();

        let mut names = Vec::new();
        while let Some(name) = out_rx.recv().await {
            names.push(name);
        }
        assert_eq!(names, vec!["sales", "stock"]);
    }
}
