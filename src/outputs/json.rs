//! JSON run manifest.
//!
//! Records what the crawl did, independent of article extraction: when it
//! ran, the limits it ran with, how every keyword terminated and every
//! accepted search result in emission order.

use crate::models::{KeywordReport, QuotaConfig, ResultRecord};
use serde::{Deserialize, Serialize};
use std::error::Error;
use tokio::fs;
use tracing::{error, info, instrument};

#[derive(Debug, Deserialize, Serialize)]
pub struct RunManifest {
    /// Run timestamp, `YYYYmmdd_HHMMSS` local time.
    pub timestamp: String,
    pub results_per_keyword: usize,
    pub max_pages: usize,
    /// Page requests sent to the search engine.
    pub requests: usize,
    /// Articles handed to the exporter.
    pub extracted: usize,
    /// Of those, fallback records for articles that could not be fetched.
    pub failed_extractions: usize,
    pub elapsed_secs: f64,
    pub keywords: Vec<KeywordReport>,
    pub results: Vec<ResultRecord>,
}

impl RunManifest {
    pub fn new(timestamp: &str, quota: QuotaConfig) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            results_per_keyword: quota.results_per_keyword,
            max_pages: quota.max_pages,
            requests: 0,
            extracted: 0,
            failed_extractions: 0,
            elapsed_secs: 0.0,
            keywords: Vec::new(),
            results: Vec::new(),
        }
    }
}

/// Write a [`RunManifest`] as pretty-printed JSON.
///
/// # Arguments
///
/// * `manifest` - What the run did, per keyword and per accepted result
/// * `output_dir` - Directory to write into; created if missing
///
/// # Returns
///
/// The written path, or an error if directory creation, serialization or
/// the write fails.
///
/// # Output Path
///
/// The file is written to: `{output_dir}/run_{timestamp}.json`
#[instrument(level = "info", skip_all, fields(%output_dir))]
pub async fn write_manifest(
    manifest: &RunManifest,
    output_dir: &str,
) -> Result<String, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(manifest)?;

    if let Err(e) = fs::create_dir_all(output_dir).await {
        error!(%output_dir, error = %e, "Failed to create output dir");
        return Err(e.into());
    }

    let path = format!(
        "{}/run_{}.json",
        output_dir.trim_end_matches('/'),
        manifest.timestamp
    );
    info!(%path, "Writing run manifest");
    fs::write(&path, json).await?;
    info!(%path, "Wrote run manifest");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TerminationReason;

    fn manifest() -> RunManifest {
        let mut manifest = RunManifest::new(
            "20250314_093000",
            QuotaConfig {
                results_per_keyword: 5,
                max_pages: 3,
            },
        );
        manifest.requests = 2;
        manifest.keywords.push(KeywordReport {
            keyword: "alpha".to_string(),
            results_collected: 1,
            pages_fetched: 2,
            termination_reason: Some(TerminationReason::Exhausted),
        });
        manifest.results.push(ResultRecord {
            keyword: "alpha".to_string(),
            title: "A".to_string(),
            link: "https://a.example.com/".to_string(),
            page_index: 0,
        });
        manifest
    }

    #[test]
    fn test_manifest_serialization() {
        let json = serde_json::to_string(&manifest()).unwrap();
        assert!(json.contains("\"termination_reason\":\"exhausted\""));
        assert!(json.contains("\"results_per_keyword\":5"));
        assert!(json.contains("https://a.example.com/"));
    }

    #[tokio::test]
    async fn test_write_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().to_str().unwrap();

        let path = write_manifest(&manifest(), out).await.unwrap();

        assert!(path.ends_with("run_20250314_093000.json"));
        let written: RunManifest =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.keywords.len(), 1);
        assert_eq!(written.results[0].keyword, "alpha");
        assert_eq!(written.max_pages, 3);
    }
}
