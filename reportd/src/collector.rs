//! Concurrent card fetching.
//!
//! The collector fans out one fetch per card. A single semaphore bounds the
//! fetches in flight across every concurrent `collect` call, so several
//! generator workers share the same budget.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use report_render::{FetchResult, Matrix};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::DEFAULT_PARALLEL;
use crate::domain::Card;
use crate::fetcher::Fetcher;
use crate::{Error, Result};

/// Outcome of a collect call: whatever succeeded plus the joined failures.
#[derive(Debug)]
pub struct Collected<T> {
    pub data: T,
    pub error: Option<Error>,
}

impl<T> Collected<T> {
    /// Drop partial results if anything failed.
    pub fn into_result(self) -> Result<T> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.data),
        }
    }
}

/// Fans fetches out over a shared concurrency budget.
#[derive(Clone)]
pub struct Collector {
    fetcher: Arc<dyn Fetcher>,
    semaphore: Arc<Semaphore>,
}

impl Collector {
    /// `parallel == 0` selects the default of 32.
    pub fn new(fetcher: Arc<dyn Fetcher>, parallel: usize) -> Self {
        let parallel = if parallel == 0 { DEFAULT_PARALLEL } else { parallel };
        Self {
            fetcher,
            semaphore: Arc::new(Semaphore::new(parallel)),
        }
    }

    /// Fetch the rows of every card, keyed by card title in card order.
    pub async fn collect(
        &self,
        cancel: &CancellationToken,
        cards: &[Card],
    ) -> Result<Collected<FetchResult>> {
        let collected = self
            .fan_out(cancel, cards, |fetcher, token, uuid| async move {
                fetcher.fetch(&token, &uuid).await
            })
            .await?;

        Ok(Collected {
            data: collected.data.into_iter().collect(),
            error: collected.error,
        })
    }

    /// Fetch every card as a header-first matrix, in card order.
    pub async fn collect_matrices(
        &self,
        cancel: &CancellationToken,
        cards: &[Card],
    ) -> Result<Collected<Vec<(String, Matrix)>>> {
        self.fan_out(cancel, cards, |fetcher, token, uuid| async move {
            fetcher.fetch_matrix(&token, &uuid).await
        })
        .await
    }

    async fn fan_out<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        cards: &[Card],
        op: F,
    ) -> Result<Collected<Vec<(String, T)>>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn Fetcher>, CancellationToken, String) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if cards.is_empty() {
            return Err(Error::EmptyRequest);
        }

        let mut tasks = JoinSet::new();
        let mut task_cards = HashMap::with_capacity(cards.len());
        let mut errors = Vec::new();

        for (index, card) in cards.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    errors.push(Error::Canceled);
                    break;
                }
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        errors.push(Error::ChannelClosed("collector semaphore"));
                        break;
                    }
                },
            };

            let fut = op(self.fetcher.clone(), cancel.clone(), card.uuid().to_string());
            let handle = tasks.spawn(async move {
                let _permit = permit;
                fut.await
            });
            task_cards.insert(handle.id(), index);
        }

        let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(cards.len()).collect();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, Ok(value))) => {
                    if let Some(&index) = task_cards.get(&id) {
                        slots[index] = Some(value);
                    }
                }
                Ok((id, Err(err))) => {
                    let card = task_cards.get(&id).map(|&i| &cards[i]);
                    warn!(card = ?card.map(Card::title), error = %err, "Card fetch failed");
                    errors.push(err);
                }
                Err(join_err) => {
                    let card = task_cards.get(&join_err.id()).map(|&i| cards[i].title());
                    let reason = if join_err.is_panic() { "panicked" } else { "was aborted" };
                    warn!(card = ?card, "Card fetch {reason}");
                    errors.push(Error::Other(format!(
                        "fetch of card {} {reason}",
                        card.unwrap_or("<unknown>")
                    )));
                }
            }
        }

        let data: Vec<(String, T)> = cards
            .iter()
            .zip(slots)
            .filter_map(|(card, slot)| slot.map(|value| (card.title().to_string(), value)))
            .collect();
        debug!(
            requested = cards.len(),
            fetched = data.len(),
            failed = errors.len(),
            "Collect finished"
        );

        Ok(Collected {
            data,
            error: Error::join(errors),
        })
    }
}
