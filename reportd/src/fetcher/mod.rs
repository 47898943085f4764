//! Card data fetching.
//!
//! A [`Fetcher`] returns one card's rows or its raw matrix. Transport
//! failures are retried by [`with_retry`] according to a [`RetryPolicy`];
//! decode failures and cancellation are returned immediately.

mod http;

pub use http::{HttpFetcher, decode_rows};

use std::future::Future;

use async_trait::async_trait;
use report_render::{Matrix, Row};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::RetryPolicy;
use crate::{Error, Result};

/// Source of card data.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Rows of the card, one map per row.
    async fn fetch(&self, cancel: &CancellationToken, uuid: &str) -> Result<Vec<Row>>;

    /// The card as a header-first string matrix.
    async fn fetch_matrix(&self, cancel: &CancellationToken, uuid: &str) -> Result<Matrix>;
}

/// Run `op` until it succeeds, fails with a non-transport error, or the
/// policy's attempts are used up. Waiting between attempts ends early with
/// [`Error::Canceled`] when `cancel` fires.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        match op().await {
            Err(err) if err.is_transient() && policy.should_retry(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    target_name = %what,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay = ?delay,
                    error = %err,
                    "Fetch failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Canceled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            other => return other,
        }
    }
}
