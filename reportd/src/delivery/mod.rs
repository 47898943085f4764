//! Delivery of rendered artifacts.
//!
//! Recipients are first resolved into [`Target`]s (templates evaluated once
//! per job), then a [`Delivery`] implementation dispatches every artifact to
//! every target through the matching sink:
//! - Telegram Bot API ([`telegram`])
//! - SMB file share ([`smb`])
//! - SMTP email ([`smtp`])

pub mod smb;
pub mod smtp;
mod strategy;
mod target;
pub mod telegram;

pub use strategy::DeliveryStrategy;
pub use target::{Target, resolve_targets};

use async_trait::async_trait;
use report_render::{Attachment, ParseMode, ReportData};
use tokio_util::sync::CancellationToken;

use crate::Result;

/// A Telegram chat, optionally a forum topic in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chat {
    pub chat_id: i64,
    pub thread_id: Option<i32>,
}

/// A fully resolved email.
#[derive(Debug, Clone, PartialEq)]
pub struct Mail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// Sends messages, albums and documents to Telegram chats.
#[async_trait]
pub trait TelegramSink: Send + Sync {
    async fn send_text(&self, chat: Chat, text: &str, parse_mode: ParseMode) -> Result<()>;

    /// Send images as albums, splitting at the platform's album limit.
    async fn send_album(&self, chat: Chat, images: &[Attachment]) -> Result<()>;

    /// Send each file as its own document. Failures are joined.
    async fn send_documents(&self, chat: Chat, files: &[Attachment]) -> Result<()>;
}

/// Uploads files below a directory of a file server.
#[async_trait]
pub trait FileSink: Send + Sync {
    async fn upload(
        &self,
        cancel: &CancellationToken,
        remote_dir: &str,
        files: &[Attachment],
    ) -> Result<()>;
}

/// Sends one email.
#[async_trait]
pub trait MailSink: Send + Sync {
    async fn send(&self, mail: &Mail) -> Result<()>;
}

/// Dispatches a job's artifacts to its targets.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Deliver every artifact to every target. Failures of distinct targets
    /// are joined; one failing target never stops the others.
    async fn send(
        &self,
        cancel: &CancellationToken,
        targets: &[Target],
        artifacts: &[ReportData],
    ) -> Result<()>;
}
