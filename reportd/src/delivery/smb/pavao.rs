//! libsmbclient backend.
//!
//! `pavao::SmbClient` wraps a raw libsmbclient context and is not `Send`,
//! so each session lives on its own blocking task that owns the client and
//! serves requests from a channel.

use std::io::Write;

use async_trait::async_trait;
use bytes::Bytes;
use pavao::{SmbClient, SmbCredentials, SmbOpenOptions, SmbOptions};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{SINK, SmbConnector, SmbSession};
use crate::config::SmbConfig;
use crate::{Error, Result};

enum Request {
    Stat(oneshot::Sender<Result<()>>),
    Write {
        path: String,
        data: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    Close(oneshot::Sender<Result<()>>),
}

/// Opens libsmbclient sessions with the configured account.
pub struct PavaoConnector {
    config: SmbConfig,
}

impl PavaoConnector {
    pub fn new(config: SmbConfig) -> Self {
        Self { config }
    }

    fn credentials(&self) -> SmbCredentials {
        let share = if self.config.share.starts_with('/') {
            self.config.share.clone()
        } else {
            format!("/{}", self.config.share)
        };
        SmbCredentials::default()
            .server(format!("smb://{}", self.config.address))
            .share(share)
            .username(&self.config.user)
            .password(&self.config.password)
            .workgroup(&self.config.domain)
    }
}

#[async_trait]
impl SmbConnector for PavaoConnector {
    async fn connect(&self) -> Result<Box<dyn SmbSession>> {
        let credentials = self.credentials();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(8);
        let address = self.config.address.clone();

        tokio::task::spawn_blocking(move || {
            let options = SmbOptions::default().one_share_per_server(true);
            let client = match SmbClient::new(credentials, options) {
                Ok(client) => client,
                Err(e) => {
                    let _ = ready_tx.send(Err(smb_error("connect", e)));
                    return;
                }
            };
            // The context connects lazily; stat the root to dial, log on
            // and mount now.
            if let Err(e) = client.stat("/") {
                let _ = ready_tx.send(Err(smb_error("mount", e)));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            serve(client, rx);
        });

        ready_rx
            .await
            .map_err(|_| Error::delivery(SINK, "session worker exited during connect"))??;
        debug!(address = %address, "SMB share mounted");
        Ok(Box::new(PavaoSession { tx }))
    }
}

fn serve(client: SmbClient, mut rx: mpsc::Receiver<Request>) {
    while let Some(request) = rx.blocking_recv() {
        match request {
            Request::Stat(reply) => {
                let _ = reply.send(client.stat("/").map(|_| ()).map_err(|e| smb_error("stat", e)));
            }
            Request::Write { path, data, reply } => {
                let _ = reply.send(write_file(&client, &path, &data));
            }
            Request::Close(reply) => {
                // Dropping the context unmounts, logs off and closes the
                // connection.
                drop(client);
                let _ = reply.send(Ok(()));
                return;
            }
        }
    }
    debug!("SMB session worker stopped");
}

fn write_file(client: &SmbClient, path: &str, data: &[u8]) -> Result<()> {
    let mut file = client
        .open_with(
            path,
            SmbOpenOptions::default().create(true).write(true).truncate(true),
        )
        .map_err(|e| smb_error(&format!("open {path}"), e))?;
    file.write_all(data)
        .and_then(|()| file.flush())
        .map_err(|e| Error::delivery(SINK, format!("write {path}: {e}")))
}

fn smb_error(op: &str, err: impl std::fmt::Display) -> Error {
    Error::delivery(SINK, format!("{op}: {err}"))
}

struct PavaoSession {
    tx: mpsc::Sender<Request>,
}

impl PavaoSession {
    async fn call(&self, request: impl FnOnce(oneshot::Sender<Result<()>>) -> Request) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| Error::delivery(SINK, "session closed"))?;
        reply_rx
            .await
            .map_err(|_| Error::delivery(SINK, "session worker dropped the request"))?
    }
}

#[async_trait]
impl SmbSession for PavaoSession {
    async fn stat_root(&self) -> Result<()> {
        self.call(Request::Stat).await
    }

    async fn write_file(&self, path: &str, data: Bytes) -> Result<()> {
        let path = path.to_string();
        self.call(|reply| Request::Write { path, data, reply }).await
    }

    async fn close(&self) -> Result<()> {
        let result = self.call(Request::Close).await;
        if let Err(e) = &result {
            warn!(error = %e, "SMB session teardown failed");
        }
        result
    }
}

