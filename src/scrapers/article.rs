//! Article content extraction.
//!
//! Fetches each harvested link and pulls the article fields out of the HTML.
//! Every field has its own fallback chain; the first non-empty value wins.
//! Fetch or parse failures never escape: they become a
//! [`ContentRecord::fallback`] carrying the error message.

use super::{ExtractContent, Extraction};
use crate::fetch::{Fetch, FetchRequest};
use crate::models::{ContentRecord, ContentRequest};
use crate::utils::{truncate_chars, truncate_for_log};
use itertools::Itertools;
use once_cell::sync::Lazy;
use rand::rng;
use rand::seq::IndexedRandom;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Where to read a value from: an attribute, or the element text.
#[derive(Clone, Copy)]
enum Source {
    Attr(&'static str),
    Text,
}

struct Chain(Vec<(Selector, Source)>);

impl Chain {
    fn new(steps: &[(&str, Source)]) -> Self {
        Self(
            steps
                .iter()
                .map(|(sel, src)| (Selector::parse(sel).expect("static selector"), *src))
                .collect(),
        )
    }

    fn first(&self, document: &Html) -> Option<String> {
        self.0.iter().find_map(|(sel, src)| {
            document.select(sel).find_map(|el| {
                let value = match src {
                    Source::Attr(name) => el.value().attr(name).map(str::to_string),
                    Source::Text => Some(el.text().collect::<String>()),
                }?;
                let value = value.split_whitespace().join(" ");
                (!value.is_empty()).then_some(value)
            })
        })
    }
}

static TITLE: Lazy<Chain> = Lazy::new(|| {
    Chain::new(&[
        ("meta[property='og:title']", Source::Attr("content")),
        ("title", Source::Text),
        ("h1", Source::Text),
    ])
});
static DESCRIPTION: Lazy<Chain> = Lazy::new(|| {
    Chain::new(&[
        ("meta[name='description']", Source::Attr("content")),
        ("meta[property='og:description']", Source::Attr("content")),
    ])
});
static DATE: Lazy<Chain> = Lazy::new(|| {
    Chain::new(&[
        ("meta[property='article:published_time']", Source::Attr("content")),
        ("meta[name='date']", Source::Attr("content")),
        ("[itemprop='datePublished']", Source::Attr("content")),
        ("[itemprop='datePublished']", Source::Attr("datetime")),
        ("time[datetime]", Source::Attr("datetime")),
    ])
});
static MAIN_IMAGE: Lazy<Chain> = Lazy::new(|| {
    Chain::new(&[
        ("meta[property='og:image']", Source::Attr("content")),
        ("meta[name='twitter:image']", Source::Attr("content")),
    ])
});
static AUTHOR: Lazy<Chain> = Lazy::new(|| {
    Chain::new(&[
        ("meta[name='author']", Source::Attr("content")),
        ("meta[property='article:author']", Source::Attr("content")),
        ("[rel='author']", Source::Text),
    ])
});
static SITE: Lazy<Chain> =
    Lazy::new(|| Chain::new(&[("meta[property='og:site_name']", Source::Attr("content"))]));

static PARAGRAPHS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["article p", "main p", "p"]
        .iter()
        .map(|s| Selector::parse(s).expect("static selector"))
        .collect()
});
static IMAGES: Lazy<Selector> = Lazy::new(|| Selector::parse("img[src]").expect("static selector"));

/// Limits applied while building a [`ContentRecord`].
#[derive(Debug, Clone, Copy)]
pub struct ArticleLimits {
    pub max_content_chars: usize,
    pub max_images: usize,
}

/// [`ExtractContent`] implementation on top of any [`Fetch`].
#[derive(Debug)]
pub struct ArticleExtractor<F> {
    fetcher: F,
    identities: Vec<String>,
    limits: ArticleLimits,
}

impl<F: Fetch> ArticleExtractor<F> {
    pub fn new(fetcher: F, identities: Vec<String>, limits: ArticleLimits) -> Self {
        Self {
            fetcher,
            identities,
            limits,
        }
    }

    fn request_for(&self, url: &str) -> FetchRequest {
        let request = FetchRequest::new(url)
            .with_header("Accept", "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8");
        match self.identities.choose(&mut rng()) {
            Some(ua) => request.with_header("User-Agent", ua.as_str()),
            None => request,
        }
    }
}

impl<F: Fetch> ExtractContent for ArticleExtractor<F> {
    #[instrument(level = "info", skip_all, fields(url = %truncate_for_log(&request.url, 200), keyword = %request.keyword))]
    async fn extract(&self, request: &ContentRequest) -> Extraction {
        let fetch_request = self.request_for(&request.url);
        match self.fetcher.fetch(&fetch_request).await {
            Ok(html) => {
                let record = parse_article(&html, request, self.limits);
                info!(chars = record.content.chars().count(), "Extracted article");
                Extraction::Parsed(record)
            }
            Err(e) => {
                warn!(error = %e, "Article fetch failed; using fallback record");
                Extraction::Failed(ContentRecord::fallback(request, &e.to_string()))
            }
        }
    }
}

/// Build a [`ContentRecord`] from an article page.
pub fn parse_article(html: &str, request: &ContentRequest, limits: ArticleLimits) -> ContentRecord {
    let document = Html::parse_document(html);
    let base = Url::parse(&request.url).ok();
    let absolute = |src: String| -> Option<String> {
        match &base {
            Some(base) => base.join(&src).ok().map(|u| u.to_string()),
            None => Url::parse(&src).ok().map(|u| u.to_string()),
        }
    };

    let content = PARAGRAPHS
        .iter()
        .map(|sel| {
            document
                .select(sel)
                .map(|p| p.text().collect::<String>().split_whitespace().join(" "))
                .filter(|p| !p.is_empty())
                .join("\n\n")
        })
        .find(|text| !text.is_empty())
        .unwrap_or_default();
    debug!(chars = content.chars().count(), "Collected paragraphs");

    let images = document
        .select(&IMAGES)
        .filter_map(|img| img.value().attr("src"))
        .filter(|src| !src.starts_with("data:"))
        .filter_map(|src| absolute(src.to_string()))
        .unique()
        .take(limits.max_images)
        .collect();

    let site = SITE
        .first(&document)
        .or_else(|| base.as_ref().and_then(|u| u.host_str()).map(str::to_string))
        .unwrap_or_default();

    ContentRecord {
        title: TITLE.first(&document).unwrap_or_else(|| request.title.clone()),
        url: request.url.clone(),
        description: DESCRIPTION
            .first(&document)
            .unwrap_or_else(|| request.description.clone()),
        content: truncate_chars(&content, limits.max_content_chars),
        date: DATE.first(&document).unwrap_or_default(),
        main_image: MAIN_IMAGE
            .first(&document)
            .and_then(absolute)
            .unwrap_or_default(),
        images,
        author: AUTHOR.first(&document).unwrap_or_default(),
        site,
        keyword: request.keyword.clone(),
    }
}
