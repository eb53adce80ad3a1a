//! Google results page parser.
//!
//! Google changes its markup often, so every field is located through an
//! ordered chain of selectors and the first one that produces a usable value
//! wins:
//!
//! | Field | Chain |
//! |-------|-------|
//! | result container | `div.g` → `div.MjjYud` → `div.yuRUbf` |
//! | title | `h3.LC20lb` → `h3` → `.LC20lb` |
//! | link | `a` → `.yuRUbf a` → `div > div > a` |
//!
//! Clients served the no-JavaScript page get `/url?q=<target>` redirect
//! links; those are unwrapped to the target.

use super::{Candidate, PageParser};
use crate::utils::truncate_for_log;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, error, warn};
use url::Url;

fn selectors(chain: &[&str]) -> Vec<Selector> {
    chain
        .iter()
        .map(|s| Selector::parse(s).expect("static selector"))
        .collect()
}

static CONTAINERS: Lazy<Vec<Selector>> =
    Lazy::new(|| selectors(&["div.g", "div.MjjYud", "div.yuRUbf"]));
static TITLES: Lazy<Vec<Selector>> = Lazy::new(|| selectors(&["h3.LC20lb", "h3", ".LC20lb"]));
static LINKS: Lazy<Vec<Selector>> =
    Lazy::new(|| selectors(&["a", ".yuRUbf a", "div > div > a"]));
static GOOGLE_BASE: Lazy<Url> =
    Lazy::new(|| Url::parse("https://www.google.com/").expect("static url"));

/// [`PageParser`] for Google web search result pages.
#[derive(Debug, Default, Clone, Copy)]
pub struct GoogleResultsParser;

impl PageParser for GoogleResultsParser {
    fn parse(&self, raw: &str) -> Vec<Candidate> {
        let document = Html::parse_document(raw);

        let Some((selector_index, containers)) = CONTAINERS
            .iter()
            .enumerate()
            .map(|(i, sel)| (i, document.select(sel).collect::<Vec<_>>()))
            .find(|(_, found)| !found.is_empty())
        else {
            error!("No search result containers found; Google may have changed its markup");
            return Vec::new();
        };
        debug!(
            selector_index,
            containers = containers.len(),
            "Matched result containers"
        );

        let mut candidates = Vec::with_capacity(containers.len());
        for container in containers {
            match (title_of(container), link_of(container)) {
                (Some(title), Some(link)) => {
                    debug!(
                        title = %truncate_for_log(&title, 120),
                        link = %truncate_for_log(&link, 200),
                        "Found result"
                    );
                    candidates.push(Candidate::new(title, link));
                }
                _ => warn!("Incomplete result found, skipping"),
            }
        }
        candidates
    }
}

fn title_of(container: ElementRef<'_>) -> Option<String> {
    TITLES.iter().find_map(|sel| {
        container
            .select(sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

fn link_of(container: ElementRef<'_>) -> Option<String> {
    LINKS.iter().find_map(|sel| {
        container
            .select(sel)
            .next()
            .and_then(|el| el.value().attr("href"))
            .and_then(resolve_href)
            .filter(|href| href.starts_with("http"))
    })
}

/// Unwrap Google's `/url?q=` redirects; other hrefs pass through.
fn resolve_href(href: &str) -> Option<String> {
    let href = href.trim();
    if href.starts_with("/url?") {
        let redirect = GOOGLE_BASE.join(href).ok()?;
        return redirect
            .query_pairs()
            .find(|(k, _)| k == "q" || k == "url")
            .map(|(_, v)| v.into_owned());
    }
    Some(href.to_string())
}
