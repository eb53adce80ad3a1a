//! Run configuration and keyword loading.
//!
//! Configuration comes from an optional YAML file, with the most common knobs
//! overridable from the command line (see [`crate::cli::Cli`]). Everything is
//! validated before the first request goes out; a [`ConfigError`] aborts the
//! run cleanly.

use crate::cli::Cli;
use crate::models::QuotaConfig;
use crate::utils::truncate_for_log;
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Desktop browser user agents rotated across search requests.
pub const DEFAULT_USER_AGENTS: [&str; 6] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.6167.160 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.0.0",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("keywords file not found: {0}")]
    MissingKeywordsFile(PathBuf),
    #[error("no keywords found in {0}")]
    NoKeywords(PathBuf),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Top level configuration for a harvest run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Target number of accepted results per keyword.
    pub results_per_keyword: usize,
    /// Hard per-keyword page cap.
    pub max_pages: usize,
    /// Number of keywords per batch.
    pub batch_size: usize,
    /// Seconds to wait between page requests, drawn uniformly from `[min, max]`.
    pub inter_request_delay_range: (f64, f64),
    /// Seconds to wait between batches, drawn uniformly from `[min, max]`.
    pub inter_batch_delay_range: (f64, f64),
    /// User agents to rotate across requests.
    pub request_identity_pool: Vec<String>,
    pub search: SearchConfig,
    pub fetch: FetchConfig,
    pub extraction: ExtractionConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            results_per_keyword: 100,
            max_pages: 3,
            batch_size: 5,
            inter_request_delay_range: (2.0, 5.0),
            inter_batch_delay_range: (15.0, 30.0),
            request_identity_pool: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            search: SearchConfig::default(),
            fetch: FetchConfig::default(),
            extraction: ExtractionConfig::default(),
        }
    }
}

/// Search engine endpoint and locale.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    pub base_url: String,
    /// Interface language (`hl`).
    pub language: String,
    /// Result country (`gl`).
    pub country: String,
    /// Links matching this pattern point back at the search engine and are dropped.
    pub self_link_pattern: String,
    /// Settle time hint for browser-backed fetchers, in milliseconds.
    pub wait_hint_ms: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.google.com/search".to_string(),
            language: "en".to_string(),
            country: "us".to_string(),
            self_link_pattern:
                r"^https?://([a-z0-9-]+\.)*(google\.[a-z.]+|googleusercontent\.com|gstatic\.com)(:\d+)?(/|\?|$)"
                    .to_string(),
            wait_hint_ms: None,
        }
    }
}

/// HTTP client settings shared by search and article fetches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    /// Extra attempts after the first failure.
    pub retries: usize,
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling, before jitter.
    pub retry_max_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retries: 1,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
        }
    }
}

/// Article extraction settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub enabled: bool,
    /// Maximum number of articles fetched at once.
    pub concurrency: usize,
    pub max_content_chars: usize,
    pub max_images: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 8,
            max_content_chars: 32_000,
            max_images: 20,
        }
    }
}

impl HarvestConfig {
    /// Load the YAML file at `path`, or the defaults when `path` is `None`.
    #[instrument(level = "info")]
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            info!("No config file given; using defaults");
            return Ok(Self::default());
        };
        let path = PathBuf::from(path);
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Apply command-line overrides on top of the file configuration.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(n) = cli.results_per_keyword {
            self.results_per_keyword = n;
        }
        if let Some(n) = cli.max_pages {
            self.max_pages = n;
        }
        if let Some(n) = cli.batch_size {
            self.batch_size = n;
        }
        if cli.no_extract {
            self.extraction.enabled = false;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("results_per_keyword", self.results_per_keyword),
            ("max_pages", self.max_pages),
            ("batch_size", self.batch_size),
            ("extraction.concurrency", self.extraction.concurrency),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        check_range("inter_request_delay_range", self.inter_request_delay_range)?;
        check_range("inter_batch_delay_range", self.inter_batch_delay_range)?;
        if self.fetch.retry_max_delay_ms < self.fetch.retry_base_delay_ms {
            return Err(ConfigError::Invalid(
                "fetch.retry_max_delay_ms must not be below fetch.retry_base_delay_ms".to_string(),
            ));
        }
        if self.request_identity_pool.iter().all(|ua| ua.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "request_identity_pool must contain at least one user agent".to_string(),
            ));
        }
        Regex::new(&self.search.self_link_pattern).map_err(|e| {
            ConfigError::Invalid(format!("search.self_link_pattern is not a valid regex: {e}"))
        })?;
        Ok(())
    }

    pub fn quota(&self) -> QuotaConfig {
        QuotaConfig {
            results_per_keyword: self.results_per_keyword,
            max_pages: self.max_pages,
        }
    }
}

fn check_range(name: &str, (min, max): (f64, f64)) -> Result<(), ConfigError> {
    if !min.is_finite() || !max.is_finite() || min < 0.0 || min > max {
        return Err(ConfigError::Invalid(format!(
            "{name} must satisfy 0 <= min <= max, got [{min}, {max}]"
        )));
    }
    Ok(())
}

/// Identity of a keyword: trimmed, inner whitespace collapsed, lowercased.
pub fn normalize_keyword(keyword: &str) -> String {
    keyword.split_whitespace().join(" ").to_lowercase()
}

/// Read a newline-delimited keyword file.
///
/// Blank lines are ignored and surrounding whitespace is trimmed. Later
/// duplicates (by [`normalize_keyword`]) are dropped with a warning.
#[instrument(level = "info", fields(path = %path.display()))]
pub async fn load_keywords(path: &Path) -> Result<Vec<String>, ConfigError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(ConfigError::MissingKeywordsFile(path.to_path_buf()));
    }
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let keywords = parse_keywords(&raw);
    if keywords.is_empty() {
        return Err(ConfigError::NoKeywords(path.to_path_buf()));
    }
    info!(
        count = keywords.len(),
        keywords = %truncate_for_log(&keywords.join(", "), 300),
        "Loaded keywords"
    );
    Ok(keywords)
}

fn parse_keywords(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let fresh = seen.insert(normalize_keyword(line));
            if !fresh {
                warn!(keyword = %line, "Duplicate keyword; skipping");
            }
            fresh
        })
        .map(str::to_string)
        .collect()
}
