//! Batch scheduling, request pacing and identity rotation.
//!
//! Keywords are processed in fixed-size batches, one keyword at a time and
//! one page at a time. The [`RequestPacer`] sits in front of every page fetch:
//! it waits a random inter-request delay, checks for cancellation and hands
//! out a randomly chosen user agent. Between batches it waits a longer random
//! delay. Cancellation is only observed at these waits, never mid-fetch.

use super::aggregator::ResultAggregator;
use super::engine::PaginationEngine;
use crate::fetch::Fetch;
use crate::models::{KeywordReport, KeywordState, TerminationReason};
use crate::scrapers::PageParser;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// The run was cancelled while waiting for the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Inclusive `[min, max]` range a delay is drawn from uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    /// Build from `(min, max)` seconds. Values must already be validated.
    pub fn from_secs_f64((min, max): (f64, f64)) -> Self {
        Self {
            min: Duration::from_secs_f64(min),
            max: Duration::from_secs_f64(max),
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rng.random_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
impl DelayRange {
    pub const ZERO: DelayRange = DelayRange {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };
}

/// Delays, user agent rotation and cancellation for outgoing search requests.
#[derive(Debug)]
pub struct RequestPacer {
    request_delay: DelayRange,
    batch_delay: DelayRange,
    identities: Vec<String>,
    rng: StdRng,
    cancel: CancellationToken,
    requests_issued: usize,
}

impl RequestPacer {
    pub fn new(
        request_delay: DelayRange,
        batch_delay: DelayRange,
        identities: Vec<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_rng(request_delay, batch_delay, identities, cancel, StdRng::from_os_rng())
    }

    pub fn with_rng(
        request_delay: DelayRange,
        batch_delay: DelayRange,
        identities: Vec<String>,
        cancel: CancellationToken,
        rng: StdRng,
    ) -> Self {
        let identities = identities
            .into_iter()
            .filter(|ua| !ua.trim().is_empty())
            .collect();
        Self {
            request_delay,
            batch_delay,
            identities,
            rng,
            cancel,
            requests_issued: 0,
        }
    }

    /// Wait before the next page fetch and pick its request identity.
    ///
    /// The first request of the run goes out immediately.
    pub async fn before_request(&mut self) -> Result<Option<String>, Cancelled> {
        if self.requests_issued > 0 {
            let delay = self.request_delay.sample(&mut self.rng);
            debug!(?delay, "Inter-request delay");
            self.wait(delay).await?;
        } else if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }
        self.requests_issued += 1;
        Ok(self.identities.choose(&mut self.rng).cloned())
    }

    /// Wait between two batches.
    pub async fn between_batches(&mut self) -> Result<(), Cancelled> {
        let delay = self.batch_delay.sample(&mut self.rng);
        info!(?delay, "Pausing between batches");
        self.wait(delay).await
    }

    pub fn requests_issued(&self) -> usize {
        self.requests_issued
    }

    async fn wait(&self, delay: Duration) -> Result<(), Cancelled> {
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Cancelled),
            _ = sleep(delay) => Ok(()),
        }
    }
}

/// Runs keywords through the pagination engine batch by batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchScheduler {
    batch_size: usize,
}

impl BatchScheduler {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Paginate every keyword in order and return one report per keyword
    /// that was started. Keywords after a cancellation are not started.
    #[instrument(level = "info", skip_all, fields(keywords = keywords.len(), batch_size = self.batch_size))]
    pub async fn run<F, P>(
        &self,
        keywords: &[String],
        engine: &mut PaginationEngine<'_, F, P>,
        pacer: &mut RequestPacer,
        aggregator: &mut ResultAggregator,
    ) -> Vec<KeywordReport>
    where
        F: Fetch,
        P: PageParser,
    {
        let batches: Vec<&[String]> = keywords.chunks(self.batch_size).collect();
        let total_batches = batches.len();
        let mut reports = Vec::with_capacity(keywords.len());

        'batches: for (batch_index, batch) in batches.into_iter().enumerate() {
            info!(
                batch = batch_index + 1,
                total_batches,
                keywords = ?batch,
                "Starting batch"
            );

            for keyword in batch {
                let mut state = KeywordState::new(keyword.as_str());
                let reason = engine.paginate(&mut state, pacer, aggregator).await;
                reports.push(KeywordReport::from(state));
                if reason == TerminationReason::Cancelled {
                    warn!(%keyword, "Run cancelled; not starting remaining keywords");
                    break 'batches;
                }
            }

            let is_last = batch_index + 1 == total_batches;
            if !is_last && pacer.between_batches().await.is_err() {
                warn!(batch = batch_index + 1, "Run cancelled between batches");
                break;
            }
        }

        info!(
            keywords_processed = reports.len(),
            requests = pacer.requests_issued(),
            results = aggregator.len(),
            "Batch scheduling finished"
        );
        reports
    }
}
