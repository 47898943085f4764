//! HTTP fetcher for public analytics cards.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use report_render::{Matrix, Row, RowValue, csv_export};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{Fetcher, with_retry};
use crate::config::FetchConfig;
use crate::domain::RetryPolicy;
use crate::utils::http_client::build_client;
use crate::{Error, Result};

/// Fetches card results from `{base_url}/api/public/card/{uuid}/query/{format}`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self::with_client(
            build_client(config.request_timeout)?,
            &config.base_url,
            RetryPolicy::from_config(config),
        ))
    }

    pub fn with_client(client: Client, base_url: &str, policy: RetryPolicy) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
        }
    }

    fn card_url(&self, uuid: &str, format: &str) -> String {
        format!("{}/api/public/card/{}/query/{}", self.base_url, uuid, format)
    }

    async fn get_once(&self, url: &str) -> Result<Bytes> {
        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("{url} returned {status}: {}", truncate(&body, 200));
            return Err(if is_retryable_status(status) {
                Error::Transport(message)
            } else {
                Error::Other(message)
            });
        }

        response.bytes().await.map_err(classify)
    }

    async fn get(&self, cancel: &CancellationToken, uuid: &str, format: &str) -> Result<Bytes> {
        let url = self.card_url(uuid, format);
        let url = url.as_str();
        with_retry(&self.policy, cancel, uuid, || async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(Error::Canceled),
                result = self.get_once(url) => result,
            }
        })
        .await
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self, cancel), level = "debug")]
    async fn fetch(&self, cancel: &CancellationToken, uuid: &str) -> Result<Vec<Row>> {
        let body = self.get(cancel, uuid, "json").await?;
        let rows = decode_rows(&body)?;
        debug!(rows = rows.len(), "Fetched card rows");
        Ok(rows)
    }

    #[instrument(skip(self, cancel), level = "debug")]
    async fn fetch_matrix(&self, cancel: &CancellationToken, uuid: &str) -> Result<Matrix> {
        let body = self.get(cancel, uuid, "csv").await?;
        csv_export::parse_matrix(&body).map_err(|e| Error::Decode(e.to_string()))
    }
}

/// Decode a JSON array of row objects.
pub fn decode_rows(body: &[u8]) -> Result<Vec<Row>> {
    let objects: Vec<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))?;

    Ok(objects
        .into_iter()
        .map(|object| {
            object
                .into_iter()
                .map(|(key, value)| (key, RowValue::from_json(value)))
                .collect()
        })
        .collect())
}

fn classify(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(err.to_string())
    } else if err.is_decode() {
        Error::Decode(err.to_string())
    } else {
        Error::Transport(err.to_string())
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
