//! Article extraction pipeline.
//!
//! Consumes search results as the crawler accepts them and extracts up to
//! `concurrency` articles at once. Article hosts share nothing with the
//! search engine, so running them in parallel does not affect the crawl's
//! pacing. Completion order is arbitrary; results are sorted back into the
//! crawler's emission order before they are returned.

use crate::crawler::aggregator::Sequenced;
use crate::models::{ContentRecord, ContentRequest, ResultRecord};
use crate::scrapers::{ExtractContent, Extraction};
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, instrument};

/// Records ready for export, with how many of them are fallbacks.
#[derive(Debug, Default)]
pub struct Extracted {
    pub records: Vec<ContentRecord>,
    pub failed: usize,
}

/// Extract every record received on `results` until the sender is dropped.
#[instrument(level = "info", skip_all, fields(concurrency = concurrency))]
pub async fn extract_streamed<E>(
    extractor: &E,
    mut results: UnboundedReceiver<Sequenced>,
    concurrency: usize,
) -> Extracted
where
    E: ExtractContent,
{
    let mut extracted: Vec<(usize, Extraction)> =
        stream::poll_fn(move |cx| results.poll_recv(cx))
            .map(|(seq, record)| async move {
                let request = ContentRequest::from(&record);
                (seq, extractor.extract(&request).await)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

    extracted.sort_by_key(|(seq, _)| *seq);
    let failed = extracted.iter().filter(|(_, e)| e.is_failed()).count();
    info!(
        total = extracted.len(),
        failed,
        "Article extraction finished"
    );
    Extracted {
        records: extracted
            .into_iter()
            .map(|(_, extraction)| extraction.into_record())
            .collect(),
        failed,
    }
}

/// Rows for a run without article extraction: search result fields only.
pub fn search_only(records: &[ResultRecord]) -> Vec<ContentRecord> {
    records
        .iter()
        .map(|record| ContentRecord {
            title: record.title.clone(),
            url: record.link.clone(),
            keyword: record.keyword.clone(),
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Finishes later records first, so completion order is reversed.
    struct SlowFirst;

    impl ExtractContent for SlowFirst {
        async fn extract(&self, request: &ContentRequest) -> Extraction {
            let n: u64 = request.url.rsplit('/').next().unwrap().parse().unwrap();
            tokio::time::sleep(Duration::from_millis(50 - n * 10)).await;
            if n == 2 {
                return Extraction::Failed(ContentRecord::fallback(request, "boom"));
            }
            Extraction::Parsed(ContentRecord {
                url: request.url.clone(),
                keyword: request.keyword.clone(),
                content: format!("body {n}"),
                ..Default::default()
            })
        }
    }

    fn record(n: usize) -> ResultRecord {
        ResultRecord {
            keyword: "kw".to_string(),
            title: format!("t{n}"),
            link: format!("https://example.com/{n}"),
            page_index: 0,
        }
    }

    #[tokio::test]
    async fn test_results_come_back_in_emission_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        for n in 0..4 {
            tx.send((n, record(n))).unwrap();
        }
        drop(tx);

        let extracted = extract_streamed(&SlowFirst, rx, 4).await;
        let records = &extracted.records;

        let urls: Vec<_> = records.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/0",
                "https://example.com/1",
                "https://example.com/2",
                "https://example.com/3",
            ]
        );
        assert_eq!(records[2].content, "Error: boom");
        assert_eq!(records[3].content, "body 3");
        assert_eq!(extracted.failed, 1);
    }

    /// Parses everything; the body echoes the title.
    struct EchoTitle;

    impl ExtractContent for EchoTitle {
        async fn extract(&self, request: &ContentRequest) -> Extraction {
            Extraction::Parsed(ContentRecord {
                url: request.url.clone(),
                content: request.title.clone(),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_failures_are_counted_from_outcome_not_content() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tricky = record(0);
        tricky.title = "Error: 404 is a great film".to_string();
        tx.send((0, tricky)).unwrap();
        drop(tx);

        let extracted = extract_streamed(&EchoTitle, rx, 2).await;

        assert_eq!(extracted.failed, 0);
        assert_eq!(extracted.records[0].content, "Error: 404 is a great film");
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let (tx, rx) = mpsc::unbounded_channel::<Sequenced>();
        drop(tx);
        let extracted = extract_streamed(&SlowFirst, rx, 2).await;
        assert!(extracted.records.is_empty());
        assert_eq!(extracted.failed, 0);
    }

    #[test]
    fn test_search_only_rows() {
        let rows = search_only(&[record(1)]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].url, "https://example.com/1");
        assert_eq!(rows[0].title, "t1");
        assert!(rows[0].content.is_empty());
    }
}
