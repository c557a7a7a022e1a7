//! Command-line interface definitions for image_sources.
//!
//! Crawl settings can come from a YAML file (`--config`), environment
//! variables, or flags; flags win.

use crate::config::CrawlConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for image_sources.
///
/// # Examples
///
/// ```sh
/// # Collect sources for every batch in ./json, skipping rarely shared images
/// image_sources collect ./json --min-share 5
///
/// # Classify the collected sources, keeping verdicts between runs
/// image_sources fact-check ./json/sources --cache-file verdicts.json
///
/// # Print the search URLs of the first ten images of a batch
/// image_sources links ./json/images_data_Out21.json 10
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to config.yaml file
    #[arg(short, long, global = true, env = "IMAGE_SOURCES_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Collect the pages every image of every batch file appeared on
    Collect {
        /// Folder holding the batch JSON files
        json_folder: PathBuf,

        /// Skip images shared fewer times than this
        #[arg(long, default_value_t = 0)]
        min_share: i64,

        /// Only the first N numbered images of each batch (0 = all)
        #[arg(short, long, default_value_t = 0)]
        limit: usize,

        /// Images processed at the same time
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        #[command(flatten)]
        crawl: CrawlArgs,
    },

    /// Collect sources for image ids listed in the first column of a CSV file
    CollectCsv {
        csv: PathBuf,

        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        #[command(flatten)]
        crawl: CrawlArgs,
    },

    /// Classify collected sources against the known fact-checking sites
    FactCheck {
        /// Folder holding collected batches (usually `<json_folder>/sources`)
        json_folder: PathBuf,

        /// JSON file the link → verdict cache is loaded from and saved to
        #[arg(long, env = "IMAGE_SOURCES_CACHE_FILE")]
        cache_file: Option<PathBuf>,

        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        #[command(flatten)]
        crawl: CrawlArgs,
    },

    /// Print the search URLs of the first N images of a batch (0 = all)
    Links { json_file: PathBuf, n_images: usize },

    /// Count collected sources per site
    Inspect {
        /// Folder holding collected batches
        json_folder: PathBuf,
    },

    /// Print the metadata of one or more pages as JSON
    Meta {
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

/// Overrides for the crawl settings of the config file.
#[derive(Args, Debug, Default, Clone)]
pub struct CrawlArgs {
    /// Result pages read per image
    #[arg(short, long, env = "IMAGE_SOURCES_PAGES")]
    pub pages: Option<usize>,

    /// Lower bound, in seconds, of the pause after each request
    #[arg(long, env = "IMAGE_SOURCES_SLEEP_MIN")]
    pub sleep_min: Option<f64>,

    /// Upper bound, in seconds, of the pause after each request
    #[arg(long, env = "IMAGE_SOURCES_SLEEP_MAX")]
    pub sleep_max: Option<f64>,

    /// Give up on a page after this many failed attempts (default: never)
    #[arg(long, env = "IMAGE_SOURCES_MAX_ATTEMPTS")]
    pub max_attempts: Option<usize>,
}

impl CrawlArgs {
    /// Apply the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut CrawlConfig) {
        if let Some(pages) = self.pages {
            config.pages = pages;
        }
        if let Some(min) = self.sleep_min {
            config.sleep_min = min;
        }
        if let Some(max) = self.sleep_max {
            config.sleep_max = max;
        }
        if self.max_attempts.is_some() {
            config.max_attempts = self.max_attempts;
        }
    }
}
