//! SMB file share sink.
//!
//! The sink keeps one authenticated session with the share mounted. A
//! monitor task checks it on every tick (and right after a failed upload)
//! and reconnects with jittered back-off when the check fails. Uploads and
//! the monitor take the same lock, so a reconnect never races an upload.

mod backoff;
mod pavao;

pub use backoff::Backoff;
pub use pavao::PavaoConnector;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use report_render::Attachment;
use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::FileSink;
use crate::config::SmbConfig;
use crate::{Error, Result};

const SINK: &str = "smb";

/// An authenticated session with a mounted share.
#[async_trait]
pub trait SmbSession: Send + Sync {
    /// Stat the share root.
    async fn stat_root(&self) -> Result<()>;

    /// Create `path` (truncating), write `data` and close the handle.
    async fn write_file(&self, path: &str, data: Bytes) -> Result<()>;

    /// Unmount, log off and close the connection. Each step is attempted
    /// even if an earlier one fails.
    async fn close(&self) -> Result<()>;
}

/// Dials, authenticates and mounts.
#[async_trait]
pub trait SmbConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn SmbSession>>;
}

type SessionSlot = Mutex<Option<Box<dyn SmbSession>>>;

/// Monitor and reconnect tuning.
#[derive(Debug, Clone)]
pub struct SmbPolicy {
    pub monitor_interval: Duration,
    /// 0 means unlimited.
    pub max_reconnect_attempts: u32,
    pub backoff: Backoff,
}

impl From<&SmbConfig> for SmbPolicy {
    fn from(config: &SmbConfig) -> Self {
        Self {
            monitor_interval: config.monitor_interval,
            max_reconnect_attempts: config.max_reconnect_attempts,
            backoff: Backoff::default(),
        }
    }
}

/// Long-lived SMB session shared by uploads and the monitor.
pub struct SmbSink {
    connector: Arc<dyn SmbConnector>,
    session: Arc<SessionSlot>,
    policy: SmbPolicy,
    wake_monitor: Arc<Notify>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl SmbSink {
    /// Connect and start the monitor. Fails if the first connect fails.
    pub async fn connect(
        connector: Arc<dyn SmbConnector>,
        policy: SmbPolicy,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let session = connector.connect().await?;
        info!("SMB session established");

        let sink = Self {
            connector,
            session: Arc::new(Mutex::new(Some(session))),
            policy,
            wake_monitor: Arc::new(Notify::new()),
            cancel,
            tasks: TaskTracker::new(),
        };
        sink.spawn_monitor();
        Ok(sink)
    }

    fn spawn_monitor(&self) {
        let connector = self.connector.clone();
        let session = self.session.clone();
        let policy = self.policy.clone();
        let wake = self.wake_monitor.clone();
        let cancel = self.cancel.clone();

        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(policy.monitor_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = wake.notified() => debug!("SMB monitor woken after upload failure"),
                }

                let mut slot = session.lock().await;
                let healthy = match slot.as_ref() {
                    Some(s) => match s.stat_root().await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(error = %e, "SMB session check failed");
                            false
                        }
                    },
                    None => false,
                };
                if healthy {
                    continue;
                }

                match reconnect(&*connector, &mut slot, &policy, &cancel).await {
                    Ok(()) => info!("SMB session re-established"),
                    Err(Error::Canceled) => break,
                    Err(e) => {
                        error!(error = %e, "SMB reconnect abandoned, monitor stopping");
                        break;
                    }
                }
            }
            debug!("SMB monitor stopped");
        });
    }

    /// Stop the monitor and close the session.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        if let Some(session) = self.session.lock().await.take()
            && let Err(e) = session.close().await
        {
            warn!(error = %e, "SMB session close failed");
        }
    }
}

/// Tear down whatever is in `slot` and connect again until it works, the
/// attempt budget runs out, or `cancel` fires.
async fn reconnect(
    connector: &dyn SmbConnector,
    slot: &mut Option<Box<dyn SmbSession>>,
    policy: &SmbPolicy,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut backoff = policy.backoff.clone();
    backoff.reset();
    let mut attempt = 0u32;

    loop {
        if let Some(old) = slot.take()
            && let Err(e) = old.close().await
        {
            debug!(error = %e, "Closing stale SMB session failed");
        }

        match connector.connect().await {
            Ok(session) => {
                *slot = Some(session);
                return Ok(());
            }
            Err(e) => {
                attempt += 1;
                warn!(attempt, error = %e, "SMB reconnect failed");
                if policy.max_reconnect_attempts > 0 && attempt >= policy.max_reconnect_attempts {
                    return Err(Error::delivery(
                        SINK,
                        format!("gave up after {attempt} reconnect attempts: {e}"),
                    ));
                }
            }
        }

        let sleep = backoff.next_sleep();
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled),
            _ = tokio::time::sleep(sleep) => {}
        }
    }
}

/// Join a remote directory and a file name with `/`.
pub fn remote_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches(['/', '\\']);
    let name = name.trim_start_matches(['/', '\\']);
    if dir.is_empty() {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

#[async_trait]
impl FileSink for SmbSink {
    async fn upload(
        &self,
        cancel: &CancellationToken,
        remote_dir: &str,
        files: &[Attachment],
    ) -> Result<()> {
        let mut slot = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled),
            slot = self.session.lock() => slot,
        };

        if slot.is_none() {
            debug!("No SMB session, connecting before upload");
            *slot = Some(self.connector.connect().await?);
        }
        let Some(session) = slot.as_ref() else {
            return Err(Error::delivery(SINK, "no session"));
        };

        let mut errors = Vec::new();
        for file in files {
            let path = remote_path(remote_dir, &file.name);
            match session.write_file(&path, file.data.clone()).await {
                Ok(()) => debug!(path = %path, bytes = file.data.len(), "Uploaded"),
                Err(e) => {
                    warn!(path = %path, error = %e, "SMB upload failed");
                    errors.push(e);
                }
            }
        }
        drop(slot);

        match Error::join(errors) {
            Some(err) => {
                self.wake_monitor.notify_one();
                Err(err)
            }
            None => Ok(()),
        }
    }
}
