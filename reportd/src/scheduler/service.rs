//! Cron engine and its control loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::control::{SchedulerEvent, SchedulerHandle};
use crate::Result;
use crate::database::ReportRepository;
use crate::domain::ScheduleUnit;

/// Wall clock used to place cron fires.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A cache that can be dropped when schedules change.
pub trait Reload: Send + Sync {
    fn reload(&self);
}

/// Create the control channel of a scheduler.
pub fn control_channel(buffer: usize) -> (SchedulerHandle, mpsc::Receiver<SchedulerEvent>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (SchedulerHandle::new(tx), rx)
}

/// The entries of a started engine.
struct Running {
    token: CancellationToken,
    entries: TaskTracker,
    names: Vec<String>,
}

/// Emits an event name every time its cron expression fires.
pub struct Scheduler {
    repo: Arc<dyn ReportRepository>,
    out: mpsc::Sender<String>,
    timezone: Tz,
    clock: Arc<dyn Clock>,
    reload_hooks: Vec<Arc<dyn Reload>>,
    cancel: CancellationToken,
    /// Pending pushes of fired event names. They outlive a stop so that
    /// fires already triggered are still delivered.
    fires: TaskTracker,
    running: Option<Running>,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn ReportRepository>,
        out: mpsc::Sender<String>,
        timezone: Tz,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            repo,
            out,
            timezone,
            clock: Arc::new(SystemClock),
            reload_hooks: Vec::new(),
            cancel,
            fires: TaskTracker::new(),
            running: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a cache to drop on restart.
    pub fn with_reload_hook(mut self, hook: Arc<dyn Reload>) -> Self {
        self.reload_hooks.push(hook);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Event names of the running entries.
    pub fn entries(&self) -> &[String] {
        match &self.running {
            Some(running) => &running.names,
            None => &[],
        }
    }

    /// Load the active schedule and start one entry per unit, replacing any
    /// running entries. Returns the number of entries started.
    pub async fn start(&mut self) -> Result<usize> {
        if self.running.is_some() {
            self.stop().await;
        }

        let units: Vec<ScheduleUnit> = self
            .repo
            .load_schedule()
            .await?
            .into_iter()
            .filter_map(|model| {
                let name = model.cron_name.clone();
                match model.into_unit() {
                    Ok(unit) => Some(unit),
                    Err(e) => {
                        error!(cron = %name, error = %e, "Skipping schedule with invalid cron");
                        None
                    }
                }
            })
            .collect();

        let token = self.cancel.child_token();
        let entries = TaskTracker::new();
        let names = units.iter().map(|u| u.cron_name.clone()).collect();
        for unit in units {
            self.spawn_entry(unit, &token, &entries);
        }

        let running = Running {
            token,
            entries,
            names,
        };
        let count = running.names.len();
        info!(entries = count, timezone = %self.timezone, "Scheduler started");
        self.running = Some(running);
        Ok(count)
    }

    /// Stop firing. Pushes of fires that already happened still complete.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.token.cancel();
        running.entries.close();
        running.entries.wait().await;
        info!(entries = running.names.len(), "Scheduler stopped");
    }

    async fn restart(&mut self) -> Result<usize> {
        self.stop().await;
        for hook in &self.reload_hooks {
            hook.reload();
        }
        self.start().await
    }

    fn spawn_entry(&self, unit: ScheduleUnit, token: &CancellationToken, entries: &TaskTracker) {
        let out = self.out.clone();
        let fires = self.fires.clone();
        let clock = self.clock.clone();
        let timezone = self.timezone;
        let token = token.clone();
        let root = self.cancel.clone();

        entries.spawn(async move {
            let mut last_fire: Option<DateTime<Utc>> = None;
            loop {
                let now = clock.now();
                // Never fire the same instant twice, even if the wall clock
                // lags the timer.
                let from = match last_fire {
                    Some(last) if last > now => last,
                    _ => now,
                };
                let Some(next) = unit.cron.next_after(&from.with_timezone(&timezone)) else {
                    warn!(cron = %unit.cron_name, "Cron has no upcoming fire");
                    break;
                };
                let next = next.with_timezone(&Utc);
                let wait = (next - now).to_std().unwrap_or_default();

                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                last_fire = Some(next);

                debug!(cron = %unit.cron_name, at = %next, "Cron fired");
                let out = out.clone();
                let name = unit.cron_name.clone();
                let root = root.clone();
                // A slow consumer must not delay the next fire.
                fires.spawn(async move {
                    tokio::select! {
                        _ = root.cancelled() => {}
                        sent = out.send(name) => {
                            if let Err(e) = sent {
                                warn!(cron = %e.0, "Event channel closed, dropping fire");
                            }
                        }
                    }
                });
            }
        });
    }

    async fn apply(&mut self, event: SchedulerEvent) {
        info!(event = %event, "Scheduler control event");
        let result = match event {
            SchedulerEvent::Start => self.start().await.map(|_| ()),
            SchedulerEvent::Stop => {
                self.stop().await;
                Ok(())
            }
            SchedulerEvent::Restart => self.restart().await.map(|_| ()),
        };
        if let Err(e) = result {
            error!(event = %event, error = %e, "Scheduler transition failed");
        }
    }

    /// Start, then apply control events until the root token is cancelled.
    ///
    /// On return every entry is stopped and the outbound channel is closed.
    pub async fn run(mut self, mut control: mpsc::Receiver<SchedulerEvent>) {
        if let Err(e) = self.start().await {
            error!(error = %e, "Initial scheduler start failed");
        }

        let mut control_open = true;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = async {
                    if control_open {
                        control.recv().await
                    } else {
                        std::future::pending().await
                    }
                } => match event {
                    Some(event) => self.apply(event).await,
                    None => {
                        debug!("Scheduler control channel closed");
                        control_open = false;
                    }
                },
            }
        }

        self.stop().await;
        self.fires.close();
        self.fires.wait().await;
        info!("Scheduler shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::memory::MemoryReportRepository;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    /// Wall clock that follows tokio's (paused) time.
    struct VirtualClock {
        base: DateTime<Utc>,
        origin: Instant,
    }

    impl VirtualClock {
        fn at(base: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                base,
                origin: Instant::now(),
            })
        }
    }

    impl Clock for VirtualClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = Instant::now() - self.origin;
            self.base + chrono::Duration::from_std(elapsed).unwrap_or_default()
        }
    }

    #[derive(Default)]
    struct CountingHook(AtomicUsize);

    impl Reload for CountingHook {
        fn reload(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(name) = rx.try_recv() {
            out.push(name);
        }
        out
    }

    /// 30 seconds before a minute boundary.
    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 30).unwrap()
    }

    fn scheduler(
        repo: &Arc<MemoryReportRepository>,
        cancel: &CancellationToken,
    ) -> (Scheduler, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(15);
        let scheduler = Scheduler::new(repo.clone(), tx, chrono_tz::UTC, cancel.clone())
            .with_clock(VirtualClock::at(base()));
        (scheduler, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_per_minute() {
        let repo = Arc::new(MemoryReportRepository::default());
        repo.set_schedule(&[("every_minute", "* * * * *"), ("hourly", "0 * * * *")]);
        let cancel = CancellationToken::new();
        let (mut scheduler, mut rx) = scheduler(&repo, &cancel);

        assert_eq!(scheduler.start().await.unwrap(), 2);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(drain(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(drain(&mut rx), vec!["every_minute"]);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(drain(&mut rx), vec!["every_minute"]);

        scheduler.stop().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_cron_is_skipped() {
        let repo = Arc::new(MemoryReportRepository::default());
        repo.set_schedule(&[("broken", "61 * * * *"), ("ok", "*/5 * * * *")]);
        let cancel = CancellationToken::new();
        let (mut scheduler, _rx) = scheduler(&repo, &cancel);

        assert_eq!(scheduler.start().await.unwrap(), 1);
        assert_eq!(scheduler.entries(), ["ok".to_string()]);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_reloads_schedule() {
        let repo = Arc::new(MemoryReportRepository::default());
        repo.set_schedule(&[("a", "* * * * *")]);
        let cancel = CancellationToken::new();
        let (scheduler, mut rx) = scheduler(&repo, &cancel);
        let hook = Arc::new(CountingHook::default());
        let scheduler = scheduler.with_reload_hook(hook.clone());

        let (handle, control) = control_channel(4);
        let task = tokio::spawn(scheduler.run(control));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(drain(&mut rx), vec!["a"]);

        repo.set_schedule(&[("b", "* * * * *")]);
        handle.restart().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(drain(&mut rx), vec!["b"]);
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
        assert_eq!(repo.count("load_schedule"), 2);

        handle.stop().await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(drain(&mut rx).is_empty());

        cancel.cancel();
        task.await.unwrap();
        // The scheduler owned the only sender.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_replaces_entries() {
        let repo = Arc::new(MemoryReportRepository::default());
        repo.set_schedule(&[("a", "* * * * *")]);
        let cancel = CancellationToken::new();
        let (mut scheduler, mut rx) = scheduler(&repo, &cancel);

        scheduler.start().await.unwrap();
        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(drain(&mut rx), vec!["a"]);
        scheduler.stop().await;
    }
}
