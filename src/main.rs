//! # keyword_harvest
//!
//! Harvests search engine results for a list of keywords, extracts the
//! linked articles and exports them to a spreadsheet.
//!
//! ## Usage
//!
//! ```sh
//! keyword_harvest -k keywords.txt -o outputs
//! ```
//!
//! ## Architecture
//!
//! 1. **Loading**: read and validate the configuration and the keyword file
//! 2. **Harvesting**: page through search results keyword by keyword, in
//!    batches, with randomized delays and rotating user agents
//! 3. **Extracting**: fetch accepted links concurrently (8 at a time by
//!    default) while the crawl is still running
//! 4. **Output**: write the spreadsheet and a JSON run manifest
//!
//! Only configuration problems abort a run. Every other failure is logged
//! and the run writes whatever it collected.

use chrono::Local;
use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod crawler;
mod extraction;
mod fetch;
mod models;
mod outputs;
mod scrapers;
mod utils;

use cli::Cli;
use config::{HarvestConfig, load_keywords};
use fetch::{HttpFetcher, RetryFetch};
use outputs::json::{RunManifest, write_manifest};
use outputs::xlsx;
use scrapers::article::{ArticleExtractor, ArticleLimits};
use scrapers::google::GoogleResultsParser;
use utils::{ensure_writable_dir, run_timestamp};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let timestamp = run_timestamp(Local::now());
    info!(%timestamp, "keyword_harvest starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    // ---- Configuration and keywords: failures here end the run before any fetch ----
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration; exiting");
            return Ok(());
        }
    };
    let keywords = match load_keywords(&args.keywords).await {
        Ok(keywords) => keywords,
        Err(e) => {
            error!(error = %e, "No valid keywords provided; exiting");
            return Ok(());
        }
    };
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir,
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Ok(());
    }

    // ---- Fetchers ----
    let timeout = Duration::from_secs(config.fetch.timeout_secs);
    let retry_delay = Duration::from_millis(config.fetch.retry_base_delay_ms);
    let retry_ceiling = Duration::from_millis(config.fetch.retry_max_delay_ms);
    let http = match HttpFetcher::new(timeout) {
        Ok(http) => http,
        Err(e) => {
            error!(error = %e, "Failed to build HTTP client; exiting");
            return Ok(());
        }
    };
    let search_fetcher = RetryFetch::new(http.clone(), config.fetch.retries, retry_delay)
        .with_max_delay(retry_ceiling);
    let extractor = ArticleExtractor::new(
        RetryFetch::new(http, config.fetch.retries, retry_delay).with_max_delay(retry_ceiling),
        config.request_identity_pool.clone(),
        ArticleLimits {
            max_content_chars: config.extraction.max_content_chars,
            max_images: config.extraction.max_images,
        },
    );

    // ---- Ctrl-C stops the crawl before its next request ----
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; finishing current request and stopping");
                cancel.cancel();
            }
        });
    }

    // ---- Harvest and extract concurrently ----
    info!(
        keywords = keywords.len(),
        results_per_keyword = config.results_per_keyword,
        max_pages = config.max_pages,
        batch_size = config.batch_size,
        extraction = config.extraction.enabled,
        "Starting search harvest"
    );
    let (stream_tx, stream_rx) = if config.extraction.enabled {
        let (tx, rx) = mpsc::unbounded_channel();
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let pacer = crawler::pacer_from_config(&config, cancel.clone());
    let harvest = crawler::harvest(
        &config,
        &keywords,
        &search_fetcher,
        &GoogleResultsParser,
        pacer,
        stream_tx,
    );
    let extract = async {
        match stream_rx {
            Some(rx) => {
                extraction::extract_streamed(&extractor, rx, config.extraction.concurrency).await
            }
            None => extraction::Extracted::default(),
        }
    };
    let (outcome, extracted) = tokio::join!(harvest, extract);

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "Search harvest failed");
            crawler::HarvestOutcome::default()
        }
    };
    let failed_extractions = extracted.failed;
    let contents = if config.extraction.enabled {
        extracted.records
    } else {
        extraction::search_only(&outcome.records)
    };

    // ---- Summary ----
    info!("===== Run Summary =====");
    info!(total = outcome.records.len(), requests = outcome.requests, "Search results found");
    info!(
        count = contents.len(),
        failed = failed_extractions,
        "Content records ready for export"
    );
    for report in &outcome.reports {
        info!(
            keyword = %report.keyword,
            results = report.results_collected,
            pages = report.pages_fetched,
            reason = ?report.termination_reason,
            "Keyword summary"
        );
    }

    // ---- Output ----
    if contents.is_empty() {
        warn!("No content was extracted. Spreadsheet not created.");
    } else if let Err(e) = xlsx::write_results(&contents, &args.output_dir, &timestamp).await {
        error!(error = %e, "Failed to write spreadsheet");
    }

    let mut manifest = RunManifest::new(&timestamp, config.quota());
    manifest.requests = outcome.requests;
    manifest.extracted = contents.len();
    manifest.failed_extractions = failed_extractions;
    manifest.elapsed_secs = start_time.elapsed().as_secs_f64();
    manifest.keywords = outcome.reports;
    manifest.results = outcome.records;
    if let Err(e) = write_manifest(&manifest, &args.output_dir).await {
        error!(error = %e, "Failed to write run manifest");
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}

fn load_config(args: &Cli) -> Result<HarvestConfig, config::ConfigError> {
    let mut config = HarvestConfig::load(args.config.as_deref())?;
    config.apply_cli(args);
    config.validate()?;
    Ok(config)
}
