//! Command-line interface definitions for keyword_harvest.
//!
//! Flags given here override the matching values from the YAML config file.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for a harvest run.
///
/// # Examples
///
/// ```sh
/// # Defaults: ./keywords.txt in, ./outputs out
/// keyword_harvest
///
/// # Custom config, fewer results, search results only
/// keyword_harvest -c harvest.yaml --results-per-keyword 20 --no-extract
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Newline-delimited keywords file
    #[arg(short, long, default_value = "keywords.txt")]
    pub keywords: PathBuf,

    /// Optional path to a YAML config file
    #[arg(short, long, env = "HARVEST_CONFIG")]
    pub config: Option<String>,

    /// Directory the spreadsheet and run manifest are written to
    #[arg(short, long, default_value = "outputs")]
    pub output_dir: String,

    /// Target number of search results per keyword
    #[arg(long)]
    pub results_per_keyword: Option<usize>,

    /// Maximum number of result pages per keyword
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// Number of keywords per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Skip article extraction and export the search results only
    #[arg(long)]
    pub no_extract: bool,
}
