//! Keyword pagination engine.
//!
//! Drives page-by-page retrieval for one keyword at a time:
//!
//! 1. wait for the [`RequestPacer`] and build the page request
//! 2. fetch; a failure ends the keyword with `fetch_error`
//! 3. parse and filter every candidate, streaming accepted ones to the aggregator
//! 4. check the stopping conditions, in priority order:
//!    `quota_reached`, `max_pages_reached`, `exhausted`
//!
//! The whole page is processed before the quota check, so a keyword can end
//! with more than `results_per_keyword` records (never more than one page
//! worth). A page with zero accepted candidates ends the keyword: results
//! pages come back empty once the engine runs out of results.
//!
//! The visited-link set is owned by the engine and shared by every keyword it
//! paginates, so a link is accepted at most once per run.

use super::aggregator::ResultAggregator;
use super::scheduler::{Cancelled, RequestPacer};
use crate::config::SearchConfig;
use crate::fetch::{Fetch, FetchRequest};
use crate::models::{KeywordState, QuotaConfig, ResultRecord, TerminationReason};
use crate::scrapers::{Candidate, PageParser};
use crate::utils::truncate_for_log;
use regex::Regex;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Results per search page; the `start` offset advances by this much.
pub const PAGE_SIZE: usize = 10;

/// Builds the search request for a keyword and page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequestBuilder {
    base_url: String,
    language: String,
    country: String,
    wait_hint: Option<Duration>,
}

impl SearchRequestBuilder {
    pub fn new(search: &SearchConfig) -> Self {
        Self {
            base_url: search.base_url.clone(),
            language: search.language.clone(),
            country: search.country.clone(),
            wait_hint: search.wait_hint_ms.map(Duration::from_millis),
        }
    }

    pub fn build(&self, keyword: &str, page: usize, identity: Option<&str>) -> FetchRequest {
        let sep = if self.base_url.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}q={}&start={}&hl={}&gl={}",
            self.base_url,
            sep,
            urlencoding::encode(keyword),
            page * PAGE_SIZE,
            urlencoding::encode(&self.language),
            urlencoding::encode(&self.country),
        );

        let accept_language = format!(
            "{}-{},{};q=0.9",
            self.language,
            self.country.to_uppercase(),
            self.language
        );
        let mut request = FetchRequest::new(url).with_header("Accept-Language", accept_language);
        if let Some(ua) = identity {
            request = request.with_header("User-Agent", ua);
        }
        request.wait_hint = self.wait_hint;
        request
    }
}

/// Why a candidate was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingLink,
    UnsupportedScheme,
    SelfReferential,
    Duplicate,
}

/// Scheme and host checks applied to every candidate link.
#[derive(Debug, Clone)]
pub struct LinkFilter {
    accepted_prefixes: Vec<String>,
    self_link: Regex,
}

impl LinkFilter {
    pub fn new(self_link_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            accepted_prefixes: vec!["http://".to_string(), "https://".to_string()],
            self_link: Regex::new(self_link_pattern)?,
        })
    }

    /// Check a link against the static filters (everything except dedup).
    pub fn check<'c>(&self, link: Option<&'c str>) -> Result<&'c str, Rejection> {
        let link = link.map(str::trim).filter(|l| !l.is_empty());
        let Some(link) = link else {
            return Err(Rejection::MissingLink);
        };
        if !self.accepted_prefixes.iter().any(|p| link.starts_with(p.as_str())) {
            return Err(Rejection::UnsupportedScheme);
        }
        if self.self_link.is_match(link) {
            return Err(Rejection::SelfReferential);
        }
        Ok(link)
    }
}

/// Links accepted so far in this run.
#[derive(Debug, Default, Clone)]
pub struct VisitedLinks(HashSet<String>);

impl VisitedLinks {
    pub fn contains(&self, link: &str) -> bool {
        self.0.contains(link)
    }

    /// Returns `true` if the link was not seen before.
    pub fn insert(&mut self, link: &str) -> bool {
        self.0.insert(link.to_string())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Per-page filter tallies, logged at debug level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PageTally {
    candidates: usize,
    accepted: usize,
    missing_link: usize,
    unsupported_scheme: usize,
    self_referential: usize,
    duplicate: usize,
}

impl PageTally {
    fn reject(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::MissingLink => self.missing_link += 1,
            Rejection::UnsupportedScheme => self.unsupported_scheme += 1,
            Rejection::SelfReferential => self.self_referential += 1,
            Rejection::Duplicate => self.duplicate += 1,
        }
    }
}

/// Stopping condition after a processed page, or `None` to continue.
pub fn stop_reason(
    state: &KeywordState,
    accepted_on_page: usize,
    quota: &QuotaConfig,
) -> Option<TerminationReason> {
    if state.results_collected >= quota.results_per_keyword {
        Some(TerminationReason::QuotaReached)
    } else if state.current_page + 1 >= quota.max_pages {
        Some(TerminationReason::MaxPagesReached)
    } else if accepted_on_page == 0 {
        Some(TerminationReason::Exhausted)
    } else {
        None
    }
}

/// Per-keyword pagination over a results page source.
///
/// Owns the set of links visited during the run, so a link accepted for
/// one keyword is rejected for every later one. Fetch failures end the
/// keyword; the engine never retries.
pub struct PaginationEngine<'a, F, P> {
    fetcher: &'a F,
    parser: &'a P,
    quota: QuotaConfig,
    requests: SearchRequestBuilder,
    filter: LinkFilter,
    visited: VisitedLinks,
}

impl<'a, F, P> PaginationEngine<'a, F, P>
where
    F: Fetch,
    P: PageParser,
{
    pub fn new(
        fetcher: &'a F,
        parser: &'a P,
        quota: QuotaConfig,
        requests: SearchRequestBuilder,
        filter: LinkFilter,
    ) -> Self {
        Self {
            fetcher,
            parser,
            quota,
            requests,
            filter,
            visited: VisitedLinks::default(),
        }
    }

    pub fn visited(&self) -> &VisitedLinks {
        &self.visited
    }

    /// Paginate one keyword until a stopping condition fires.
    ///
    /// Each page is fetched after waiting on the pacer, parsed, filtered and
    /// fully processed before the stopping conditions are checked in order:
    /// quota, page cap, then a page with no accepted links.
    ///
    /// # Arguments
    ///
    /// * `state` - The keyword's state; updated in place
    /// * `pacer` - Waited on before every fetch
    /// * `sink` - Receives accepted records in order
    ///
    /// # Returns
    ///
    /// Why the keyword stopped. An already terminated `state` returns its
    /// recorded reason without fetching.
    #[instrument(level = "info", skip_all, fields(keyword = %state.keyword))]
    pub async fn paginate(
        &mut self,
        state: &mut KeywordState,
        pacer: &mut RequestPacer,
        sink: &mut ResultAggregator,
    ) -> TerminationReason {
        if let Some(reason) = state.termination_reason.filter(|_| state.terminated) {
            return reason;
        }
        info!("Starting pagination");

        loop {
            let identity = match pacer.before_request().await {
                Ok(identity) => identity,
                Err(Cancelled) => return self.finish(state, TerminationReason::Cancelled),
            };
            let request = self
                .requests
                .build(&state.keyword, state.current_page, identity.as_deref());
            info!(
                page = state.current_page + 1,
                url = %truncate_for_log(&request.url, 200),
                "Fetching results page"
            );

            state.pages_fetched += 1;
            let raw = match self.fetcher.fetch(&request).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(page = state.current_page + 1, error = %e, "Results page fetch failed");
                    return self.finish(state, TerminationReason::FetchError);
                }
            };

            let candidates = self.parser.parse(&raw);
            let tally = self.accept_page(state, candidates, sink);
            debug!(page = state.current_page + 1, ?tally, "Processed results page");

            if let Some(reason) = stop_reason(state, tally.accepted, &self.quota) {
                return self.finish(state, reason);
            }
            state.current_page += 1;
        }
    }

    fn accept_page(
        &mut self,
        state: &mut KeywordState,
        candidates: Vec<Candidate>,
        sink: &mut ResultAggregator,
    ) -> PageTally {
        let mut tally = PageTally {
            candidates: candidates.len(),
            ..PageTally::default()
        };

        for candidate in candidates {
            let link = match self.filter.check(candidate.link.as_deref()) {
                Ok(link) if self.visited.contains(link) => Err(Rejection::Duplicate),
                other => other.map(str::to_string),
            };
            let link = match link {
                Ok(link) => link,
                Err(rejection) => {
                    tally.reject(rejection);
                    continue;
                }
            };

            self.visited.insert(&link);
            let record = ResultRecord {
                keyword: state.keyword.clone(),
                title: candidate.title,
                link,
                page_index: state.current_page,
            };
            if sink.push(record) {
                state.results_collected += 1;
                tally.accepted += 1;
            }
        }
        tally
    }

    fn finish(&self, state: &mut KeywordState, reason: TerminationReason) -> TerminationReason {
        let reason = state.terminate(reason);
        info!(
            results = state.results_collected,
            pages = state.pages_fetched,
            %reason,
            "Keyword finished"
        );
        reason
    }
}
