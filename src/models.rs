//! Data models shared by the crawler, the content extractor and the exporters.
//!
//! - [`ResultRecord`]: a search result accepted by the pagination engine
//! - [`KeywordState`] / [`KeywordReport`]: per-keyword pagination state and its summary
//! - [`QuotaConfig`]: per-run limits shared by every keyword
//! - [`ContentRequest`] / [`ContentRecord`]: input and output of article extraction

use serde::{Deserialize, Serialize};
use std::fmt;

/// A search result accepted by the pagination engine.
///
/// `link` is unique across the whole run, not just within one keyword.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResultRecord {
    /// The keyword whose search produced this result.
    pub keyword: String,
    /// The result title as shown on the results page.
    pub title: String,
    /// The absolute target URL.
    pub link: String,
    /// Zero-based results page the record was found on.
    pub page_index: usize,
}

/// Why a keyword stopped paginating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// `results_per_keyword` accepted results were collected.
    QuotaReached,
    /// The hard page cap was hit.
    MaxPagesReached,
    /// A page produced zero accepted candidates.
    Exhausted,
    /// The fetch capability failed for a page.
    FetchError,
    /// The run was cancelled before the next fetch.
    Cancelled,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::QuotaReached => "quota_reached",
            TerminationReason::MaxPagesReached => "max_pages_reached",
            TerminationReason::Exhausted => "exhausted",
            TerminationReason::FetchError => "fetch_error",
            TerminationReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Per-run pagination limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaConfig {
    /// Target number of accepted results per keyword.
    pub results_per_keyword: usize,
    /// Hard cap on the number of pages fetched per keyword.
    pub max_pages: usize,
}

/// Mutable pagination state for a single keyword.
///
/// Only the pagination engine mutates it; once `terminated` is set it is
/// reduced to a [`KeywordReport`] and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordState {
    pub keyword: String,
    pub results_collected: usize,
    pub current_page: usize,
    pub pages_fetched: usize,
    pub terminated: bool,
    pub termination_reason: Option<TerminationReason>,
}

impl KeywordState {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            results_collected: 0,
            current_page: 0,
            pages_fetched: 0,
            terminated: false,
            termination_reason: None,
        }
    }

    /// Mark the keyword as finished. The first reason wins.
    pub fn terminate(&mut self, reason: TerminationReason) -> TerminationReason {
        if !self.terminated {
            self.terminated = true;
            self.termination_reason = Some(reason);
        }
        self.termination_reason.unwrap_or(reason)
    }
}

/// Summary of a terminated keyword, kept for logging and the run manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeywordReport {
    pub keyword: String,
    pub results_collected: usize,
    pub pages_fetched: usize,
    pub termination_reason: Option<TerminationReason>,
}

impl From<KeywordState> for KeywordReport {
    fn from(state: KeywordState) -> Self {
        Self {
            keyword: state.keyword,
            results_collected: state.results_collected,
            pages_fetched: state.pages_fetched,
            termination_reason: state.termination_reason,
        }
    }
}

/// Input to the content extraction adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRequest {
    pub url: String,
    pub keyword: String,
    pub title: String,
    pub description: String,
}

impl From<&ResultRecord> for ContentRequest {
    fn from(record: &ResultRecord) -> Self {
        Self {
            url: record.link.clone(),
            keyword: record.keyword.clone(),
            title: record.title.clone(),
            description: String::new(),
        }
    }
}

/// An extracted article, one spreadsheet row.
///
/// Field order is the column order of the export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContentRecord {
    pub title: String,
    pub url: String,
    pub description: String,
    pub content: String,
    pub date: String,
    pub main_image: String,
    pub images: Vec<String>,
    pub author: String,
    pub site: String,
    pub keyword: String,
}

impl ContentRecord {
    /// Column headers, in export order.
    pub const COLUMNS: [&'static str; 10] = [
        "title",
        "url",
        "description",
        "content",
        "date",
        "main_image",
        "images",
        "author",
        "site",
        "keyword",
    ];

    /// Record returned when extraction fails; the error goes in `content`.
    pub fn fallback(request: &ContentRequest, error: &str) -> Self {
        Self {
            title: request.title.clone(),
            url: request.url.clone(),
            description: request.description.clone(),
            content: format!("Error: {error}"),
            keyword: request.keyword.clone(),
            ..Default::default()
        }
    }

    /// Row cells in [`ContentRecord::COLUMNS`] order.
    pub fn cells(&self) -> [String; 10] {
        [
            self.title.clone(),
            self.url.clone(),
            self.description.clone(),
            self.content.clone(),
            self.date.clone(),
            self.main_image.clone(),
            self.images.join("\n"),
            self.author.clone(),
            self.site.clone(),
            self.keyword.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ResultRecord {
        ResultRecord {
            keyword: "alpha".to_string(),
            title: "Alpha result".to_string(),
            link: "https://example.com/a".to_string(),
            page_index: 0,
        }
    }

    #[test]
    fn test_termination_reason_serializes_snake_case() {
        let json = serde_json::to_string(&TerminationReason::MaxPagesReached).unwrap();
        assert_eq!(json, "\"max_pages_reached\"");
        assert_eq!(TerminationReason::FetchError.to_string(), "fetch_error");
    }

    #[test]
    fn test_keyword_state_first_reason_wins() {
        let mut state = KeywordState::new("alpha");
        assert!(!state.terminated);
        state.terminate(TerminationReason::QuotaReached);
        let reason = state.terminate(TerminationReason::Exhausted);
        assert!(state.terminated);
        assert_eq!(reason, TerminationReason::QuotaReached);
        assert_eq!(state.termination_reason, Some(TerminationReason::QuotaReached));
    }

    #[test]
    fn test_report_from_state() {
        let mut state = KeywordState::new("beta");
        state.results_collected = 8;
        state.pages_fetched = 2;
        state.terminate(TerminationReason::MaxPagesReached);

        let report = KeywordReport::from(state);
        assert_eq!(report.keyword, "beta");
        assert_eq!(report.results_collected, 8);
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.termination_reason, Some(TerminationReason::MaxPagesReached));
    }

    #[test]
    fn test_content_request_from_record() {
        let request = ContentRequest::from(&record());
        assert_eq!(request.url, "https://example.com/a");
        assert_eq!(request.keyword, "alpha");
        assert_eq!(request.title, "Alpha result");
        assert!(request.description.is_empty());
    }

    #[test]
    fn test_fallback_record_carries_error() {
        let request = ContentRequest::from(&record());
        let fallback = ContentRecord::fallback(&request, "timed out");
        assert_eq!(fallback.content, "Error: timed out");
        assert_eq!(fallback.url, request.url);
        assert_eq!(fallback.keyword, "alpha");
        assert!(fallback.images.is_empty());
    }

    #[test]
    fn test_cells_follow_column_order() {
        let content = ContentRecord {
            title: "T".to_string(),
            url: "U".to_string(),
            images: vec!["i1".to_string(), "i2".to_string()],
            keyword: "K".to_string(),
            ..Default::default()
        };
        let cells = content.cells();
        assert_eq!(cells.len(), ContentRecord::COLUMNS.len());
        assert_eq!(cells[0], "T");
        assert_eq!(cells[1], "U");
        assert_eq!(cells[6], "i1\ni2");
        assert_eq!(cells[9], "K");
    }
}
