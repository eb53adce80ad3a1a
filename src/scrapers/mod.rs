//! HTML scrapers plugged into the crawler.
//!
//! | Scraper | Module | Role |
//! |---------|--------|------|
//! | Google results page | [`google`] | [`PageParser`]: results page → `(title, link)` candidates |
//! | Article page | [`article`] | [`ExtractContent`]: result link → [`Extraction`] |
//!
//! Both follow the same rules:
//! - Selector fallback chains are ordered, first match wins
//! - Malformed HTML never fails; it yields nothing (parser) or a fallback record (extractor)

use crate::models::{ContentRecord, ContentRequest};

pub mod article;
pub mod google;

/// A candidate result found on a results page, before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub title: String,
    pub link: Option<String>,
}

impl Candidate {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: Some(link.into()),
        }
    }
}

/// Turns raw results page content into candidates, in document order.
pub trait PageParser {
    fn parse(&self, raw: &str) -> Vec<Candidate>;
}

/// Result of one article extraction. Both arms carry an exportable record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// The article page was fetched and parsed.
    Parsed(ContentRecord),
    /// The fetch failed; the record is [`ContentRecord::fallback`].
    Failed(ContentRecord),
}

impl Extraction {
    pub fn is_failed(&self) -> bool {
        matches!(self, Extraction::Failed(_))
    }

    pub fn into_record(self) -> ContentRecord {
        match self {
            Extraction::Parsed(record) | Extraction::Failed(record) => record,
        }
    }
}

/// Fetches and extracts an article. Never fails: errors produce
/// [`Extraction::Failed`] with a fallback record.
pub trait ExtractContent {
    async fn extract(&self, request: &ContentRequest) -> Extraction;
}
