//! Dispatch of artifacts to resolved targets.
//!
//! [`DeliveryStrategy`] sends every artifact of a job to every target. A
//! failing target is logged and joined into the returned error while the
//! remaining targets are still served.

use std::sync::Arc;

use async_trait::async_trait;
use report_render::{Attachment, ReportData};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Chat, Delivery, FileSink, Mail, MailSink, Target, TelegramSink};
use crate::{Error, Result};

/// Routes each target to its sink.
///
/// A sink that is not configured turns its targets into delivery errors
/// instead of dropping them silently.
#[derive(Clone, Default)]
pub struct DeliveryStrategy {
    telegram: Option<Arc<dyn TelegramSink>>,
    files: Option<Arc<dyn FileSink>>,
    mail: Option<Arc<dyn MailSink>>,
}

impl DeliveryStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_telegram(mut self, sink: Arc<dyn TelegramSink>) -> Self {
        self.telegram = Some(sink);
        self
    }

    pub fn with_files(mut self, sink: Arc<dyn FileSink>) -> Self {
        self.files = Some(sink);
        self
    }

    pub fn with_mail(mut self, sink: Arc<dyn MailSink>) -> Self {
        self.mail = Some(sink);
        self
    }

    async fn to_telegram(&self, chat: Chat, artifacts: &[ReportData]) -> Result<()> {
        let sink = self
            .telegram
            .as_ref()
            .ok_or_else(|| Error::delivery("telegram", "telegram sink is not configured"))?;

        let mut errors = Vec::new();
        for artifact in artifacts {
            let result = match artifact {
                ReportData::Text { body, parse_mode } => sink.send_text(chat, body, *parse_mode).await,
                ReportData::ImageSet(images) => sink.send_album(chat, images).await,
                ReportData::FileSet(files) => sink.send_documents(chat, files).await,
            };
            if let Err(err) = result {
                errors.push(err);
            }
        }
        Error::join(errors).map_or(Ok(()), Err)
    }

    async fn to_file_server(
        &self,
        cancel: &CancellationToken,
        remote_dir: &str,
        artifacts: &[ReportData],
    ) -> Result<()> {
        let sink = self
            .files
            .as_ref()
            .ok_or_else(|| Error::delivery("smb", "file server sink is not configured"))?;

        let mut errors = Vec::new();
        let mut files = Vec::new();
        for artifact in artifacts {
            match artifact {
                ReportData::Text { .. } => errors.push(Error::UnsupportedArtifact {
                    sink: "smb",
                    kind: artifact.kind(),
                }),
                ReportData::ImageSet(items) | ReportData::FileSet(items) => {
                    files.extend_from_slice(items)
                }
            }
        }

        if !files.is_empty()
            && let Err(err) = sink.upload(cancel, remote_dir, &files).await
        {
            errors.push(err);
        }
        Error::join(errors).map_or(Ok(()), Err)
    }

    async fn to_mail(
        &self,
        to: &[String],
        cc: &[String],
        subject: &str,
        body: Option<&str>,
        artifacts: &[ReportData],
    ) -> Result<()> {
        let sink = self
            .mail
            .as_ref()
            .ok_or_else(|| Error::delivery("smtp", "mail sink is not configured"))?;

        let mut errors = Vec::new();
        let mut texts = Vec::new();
        let mut attachments: Vec<Attachment> = Vec::new();
        for artifact in artifacts {
            match artifact {
                ReportData::Text { body: text, .. } if body.is_none() => texts.push(text.as_str()),
                ReportData::Text { .. } => errors.push(Error::UnsupportedArtifact {
                    sink: "smtp",
                    kind: artifact.kind(),
                }),
                ReportData::FileSet(files) => attachments.extend_from_slice(files),
                ReportData::ImageSet(images) => attachments.extend_from_slice(images),
            }
        }

        let mail = Mail {
            to: to.to_vec(),
            cc: cc.to_vec(),
            subject: subject.to_string(),
            body: body.map_or_else(|| texts.join("\n\n"), str::to_string),
            attachments,
        };
        if let Err(err) = sink.send(&mail).await {
            errors.push(err);
        }
        Error::join(errors).map_or(Ok(()), Err)
    }
}

#[async_trait]
impl Delivery for DeliveryStrategy {
    async fn send(
        &self,
        cancel: &CancellationToken,
        targets: &[Target],
        artifacts: &[ReportData],
    ) -> Result<()> {
        let mut errors = Vec::new();

        for target in targets {
            if cancel.is_cancelled() {
                errors.push(Error::Canceled);
                break;
            }

            let result = match target {
                Target::Telegram(chat) => self.to_telegram(*chat, artifacts).await,
                Target::FileServer { remote_dir } => {
                    self.to_file_server(cancel, remote_dir, artifacts).await
                }
                Target::Email {
                    to,
                    cc,
                    subject,
                    body,
                } => self.to_mail(to, cc, subject, body.as_deref(), artifacts).await,
            };

            match result {
                Ok(()) => info!(sink = target.sink(), "Delivered"),
                Err(err) => {
                    warn!(sink = target.sink(), error = %err, "Delivery failed");
                    errors.push(err);
                }
            }
        }

        Error::join(errors).map_or(Ok(()), Err)
    }
}
