//! Search result harvesting.
//!
//! - [`engine`]: per-keyword pagination state machine and link filtering
//! - [`scheduler`]: batches, request pacing, user agent rotation, cancellation
//! - [`aggregator`]: ordered, duplicate-free collection of accepted results
//!
//! [`harvest`] wires the three together for a whole run. The crawl is
//! strictly sequential: one keyword at a time, one page at a time.

pub mod aggregator;
pub mod engine;
pub mod scheduler;

use crate::config::HarvestConfig;
use crate::fetch::Fetch;
use crate::models::{KeywordReport, ResultRecord};
use crate::scrapers::PageParser;
use aggregator::{ResultAggregator, Sequenced};
use engine::{LinkFilter, PaginationEngine, SearchRequestBuilder};
use scheduler::{BatchScheduler, DelayRange, RequestPacer};
use std::error::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Everything a harvest run produced.
#[derive(Debug, Default)]
pub struct HarvestOutcome {
    /// Accepted results in emission order.
    pub records: Vec<ResultRecord>,
    /// One report per keyword that was started, in scheduling order.
    pub reports: Vec<KeywordReport>,
    /// Page requests issued across all keywords.
    pub requests: usize,
}

/// Pacer for a run, built from the configured delays and identity pool.
pub fn pacer_from_config(config: &HarvestConfig, cancel: CancellationToken) -> RequestPacer {
    RequestPacer::new(
        DelayRange::from_secs_f64(config.inter_request_delay_range),
        DelayRange::from_secs_f64(config.inter_batch_delay_range),
        config.request_identity_pool.clone(),
        cancel,
    )
}

/// Harvest search results for every keyword.
///
/// Keywords run in batches of `config.batch_size`, one page at a time, and
/// every link is accepted at most once across the whole run.
///
/// # Arguments
///
/// * `config` - Validated run configuration (quota, locale, link filter)
/// * `keywords` - Keywords in scheduling order
/// * `fetcher` - Fetches results pages; retries are its own concern
/// * `parser` - Turns a results page into candidates
/// * `pacer` - Request delays, user agents and cancellation
/// * `stream` - Optional sink that receives each record as it is accepted;
///   dropped when the run ends
///
/// # Returns
///
/// The accepted records, one report per started keyword and the number of
/// page requests issued. Fails only if the self-link pattern does not
/// compile.
#[instrument(level = "info", skip_all, fields(keywords = keywords.len()))]
pub async fn harvest<F, P>(
    config: &HarvestConfig,
    keywords: &[String],
    fetcher: &F,
    parser: &P,
    mut pacer: RequestPacer,
    stream: Option<UnboundedSender<Sequenced>>,
) -> Result<HarvestOutcome, Box<dyn Error>>
where
    F: Fetch,
    P: PageParser,
{
    let filter = LinkFilter::new(&config.search.self_link_pattern)?;
    let requests = SearchRequestBuilder::new(&config.search);
    let mut engine = PaginationEngine::new(fetcher, parser, config.quota(), requests, filter);
    let mut aggregator = match stream {
        Some(sender) => ResultAggregator::with_stream(sender),
        None => ResultAggregator::new(),
    };

    let scheduler = BatchScheduler::new(config.batch_size);
    let reports = scheduler
        .run(keywords, &mut engine, &mut pacer, &mut aggregator)
        .await;

    for (keyword, count) in aggregator.counts_by_keyword() {
        info!(%keyword, count, "Results per keyword");
    }
    info!(
        visited = engine.visited().len(),
        accepted = aggregator.len(),
        "Harvest finished"
    );

    Ok(HarvestOutcome {
        records: aggregator.finish(),
        reports,
        requests: pacer.requests_issued(),
    })
}

#[cfg(test)]
mod tests {
    use super::engine::tests::{LineParser, StubFetch, page, quiet_pacer};
    use super::*;
    use crate::models::TerminationReason;
    use itertools::Itertools;
    use tokio::sync::mpsc;

    fn config(results_per_keyword: usize, max_pages: usize, batch_size: usize) -> HarvestConfig {
        HarvestConfig {
            results_per_keyword,
            max_pages,
            batch_size,
            ..HarvestConfig::default()
        }
    }

    fn keywords(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_harvest_runs_keywords_in_batch_order() {
        // alpha: 3, 3 -> quota. beta: 2, 2 -> max pages. gamma: fetch error.
        let fetch = StubFetch::new(vec![
            page("a1", 3),
            page("a2", 3),
            page("b1", 2),
            page("b2", 2),
            Err("timeout".to_string()),
        ]);
        let config = config(5, 2, 2);
        let kws = keywords(&["alpha", "beta", "gamma"]);

        let outcome = harvest(&config, &kws, &fetch, &LineParser, quiet_pacer(), None)
            .await
            .unwrap();

        let reasons: Vec<_> = outcome
            .reports
            .iter()
            .map(|r| (r.keyword.as_str(), r.termination_reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("alpha", Some(TerminationReason::QuotaReached)),
                ("beta", Some(TerminationReason::MaxPagesReached)),
                ("gamma", Some(TerminationReason::FetchError)),
            ]
        );
        assert_eq!(outcome.requests, 5);
        assert_eq!(outcome.records.len(), 10);
        let keyword_order: Vec<_> = outcome.records.iter().map(|r| r.keyword.as_str()).dedup().collect();
        assert_eq!(keyword_order, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_harvest_never_repeats_a_link() {
        let fetch = StubFetch::new(vec![page("x", 5), page("x", 5), page("y", 2), page("z", 0)]);
        let config = config(100, 3, 1);
        let kws = keywords(&["first", "second"]);

        let outcome = harvest(&config, &kws, &fetch, &LineParser, quiet_pacer(), None)
            .await
            .unwrap();

        // "first" hits 5 new links then a page of duplicates -> exhausted
        assert_eq!(outcome.reports[0].termination_reason, Some(TerminationReason::Exhausted));
        assert_eq!(outcome.reports[1].results_collected, 2);
        assert!(outcome.records.iter().map(|r| &r.link).all_unique());
        let accepted: usize = outcome.reports.iter().map(|r| r.results_collected).sum();
        assert_eq!(accepted, outcome.records.len());
    }

    #[tokio::test]
    async fn test_harvest_respects_page_cap_for_every_keyword() {
        let fetch = StubFetch::new((0..6).map(|i| page(&format!("p{i}"), 10)).collect());
        let config = config(1_000, 2, 3);
        let kws = keywords(&["k1", "k2", "k3"]);

        let outcome = harvest(&config, &kws, &fetch, &LineParser, quiet_pacer(), None)
            .await
            .unwrap();

        assert!(outcome.reports.iter().all(|r| r.pages_fetched <= 2));
        assert_eq!(fetch.calls(), 6);
    }

    #[tokio::test]
    async fn test_harvest_streams_records_in_order() {
        let fetch = StubFetch::new(vec![page("s", 3), page("t", 0)]);
        let config = config(100, 5, 5);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = harvest(&config, &keywords(&["stream"]), &fetch, &LineParser, quiet_pacer(), Some(tx))
            .await
            .unwrap();

        let mut streamed = Vec::new();
        while let Some(item) = rx.recv().await {
            streamed.push(item);
        }
        assert_eq!(streamed.len(), 3);
        assert!(streamed.iter().enumerate().all(|(i, (seq, _))| i == *seq));
        assert_eq!(streamed.into_iter().map(|(_, r)| r).collect::<Vec<_>>(), outcome.records);
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_scheduling() {
        let fetch = StubFetch::new(vec![]);
        let config = config(100, 3, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pacer = pacer_from_config(
            &HarvestConfig {
                inter_request_delay_range: (0.0, 0.0),
                inter_batch_delay_range: (0.0, 0.0),
                ..HarvestConfig::default()
            },
            cancel,
        );

        let outcome = harvest(&config, &keywords(&["a", "b", "c"]), &fetch, &LineParser, pacer, None)
            .await
            .unwrap();

        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].termination_reason, Some(TerminationReason::Cancelled));
        assert_eq!(outcome.requests, 0);
        assert!(outcome.records.is_empty());
    }
}
