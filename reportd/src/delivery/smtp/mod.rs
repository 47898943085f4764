//! SMTP sink.
//!
//! Every send opens a fresh implicit-TLS connection, authenticates with
//! PLAIN and transfers the hand-built MIME message from [`mime`]. The
//! transport is dropped when the send returns, on every path.

pub mod mime;

use async_trait::async_trait;
use chrono::Local;
use lettre::address::{Address, Envelope};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::{debug, instrument};

use super::{Mail, MailSink};
use crate::config::SmtpConfig;
use crate::{Error, Result};

const SINK: &str = "smtp";

/// Sends mails through one SMTP account.
pub struct SmtpMailer {
    config: SmtpConfig,
    from: Address,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self> {
        let from = parse_address(&config.email)?;
        Ok(Self { config, from })
    }

    fn envelope(&self, mail: &Mail) -> Result<Envelope> {
        let recipients = mail
            .to
            .iter()
            .chain(&mail.cc)
            .map(|a| parse_address(a))
            .collect::<Result<Vec<_>>>()?;
        Envelope::new(Some(self.from.clone()), recipients)
            .map_err(|e| Error::delivery(SINK, format!("invalid envelope: {e}")))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.host)
            .map_err(|e| Error::delivery(SINK, format!("TLS setup for {} failed: {e}", self.config.host)))?;
        Ok(builder
            .port(self.config.port)
            .credentials(Credentials::new(
                self.config.email.clone(),
                self.config.password.clone(),
            ))
            .authentication(vec![Mechanism::Plain])
            .timeout(Some(self.config.timeout))
            .build())
    }
}

fn parse_address(raw: &str) -> Result<Address> {
    raw.trim()
        .parse()
        .map_err(|e| Error::delivery(SINK, format!("invalid address {raw:?}: {e}")))
}

#[async_trait]
impl MailSink for SmtpMailer {
    #[instrument(skip_all, fields(to = ?mail.to, attachments = mail.attachments.len()))]
    async fn send(&self, mail: &Mail) -> Result<()> {
        let envelope = self.envelope(mail)?;
        let raw = mime::build_message(mail, self.from.as_ref(), &self.config.host, &Local::now());
        let transport = self.transport()?;

        // Connect, TLS handshake, AUTH and DATA each get the configured
        // timeout; this bounds the whole exchange.
        let deadline = self.config.timeout.saturating_mul(4);
        match tokio::time::timeout(deadline, transport.send_raw(&envelope, &raw)).await {
            Err(_) => Err(Error::Timeout(format!(
                "smtp send to {} exceeded {}",
                self.config.host,
                humantime::format_duration(deadline)
            ))),
            Ok(Err(e)) => Err(Error::delivery(SINK, e)),
            Ok(Ok(response)) => {
                debug!(code = %response.code(), bytes = raw.len(), "Mail accepted");
                Ok(())
            }
        }
    }
}
