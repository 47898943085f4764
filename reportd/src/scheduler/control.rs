//! Scheduler control plane.

use std::fmt;
use std::str::FromStr;

use tokio::sync::mpsc;

use crate::{Error, Result};

/// A requested scheduler transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    Start,
    Stop,
    Restart,
}

impl SchedulerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for SchedulerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulerEvent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            other => Err(Error::Other(format!("unknown scheduler event {other:?}"))),
        }
    }
}

/// Sending half of the scheduler control channel.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerEvent>,
}

impl SchedulerHandle {
    pub(crate) fn new(tx: mpsc::Sender<SchedulerEvent>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, event: SchedulerEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::ChannelClosed("scheduler control"))
    }

    pub async fn start(&self) -> Result<()> {
        self.send(SchedulerEvent::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(SchedulerEvent::Stop).await
    }

    pub async fn restart(&self) -> Result<()> {
        self.send(SchedulerEvent::Restart).await
    }
}
