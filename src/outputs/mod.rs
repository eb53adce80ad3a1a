//! Output generation for a harvest run.
//!
//! # Submodules
//!
//! - [`xlsx`]: spreadsheet with one row per extracted article
//! - [`json`]: run manifest with per-keyword reports and the raw search results
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── search_results_20250314_093000.xlsx
//! └── run_20250314_093000.json
//! ```

pub mod json;
pub mod xlsx;
