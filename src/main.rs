//! # image_sources
//!
//! Finds where images shared in messaging groups were published on the web
//! and whether fact-checking sites have looked at them.
//!
//! ## Features
//!
//! - Runs a reverse image search for every image of a batch and walks the
//!   "pages that include matching images" results, page after page
//! - Records each page's link and publication date, normalizing the engine's
//!   Portuguese absolute and relative dates
//! - Flags images with a source on a known fact-checking site and reads that
//!   site's verdict, caching verdicts per link
//! - Reports which sites the images were found on, and prints page metadata
//!
//! ## Usage
//!
//! ```sh
//! image_sources collect ./json --min-share 5
//! image_sources fact-check ./json/sources --cache-file verdicts.json
//! ```
//!
//! ## Architecture
//!
//! 1. **Fetching**: every request goes through one throttled, retrying fetcher
//! 2. **Walking**: result pages are parsed and followed up to the page budget
//! 3. **Classifying**: fact-check links are dispatched to per-site extractors
//! 4. **Output**: batches are written back with sources and verdicts added

use chrono::Local;
use clap::Parser;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};
use url::Url;

mod batch;
mod cli;
mod config;
mod dates;
mod error;
mod factcheck;
mod fetch;
mod metadata;
mod models;
mod results;
mod utils;
mod walker;

use batch::{
    FACT_CHECKS_DIR, SOURCES_DIR, csv_output_path, domain_frequency, list_batch_files,
    load_verdict_cache, read_batch, read_batches, read_csv_ids, search_links, sources_file_name,
    to_pretty_json, write_json,
};
use cli::{Cli, Command};
use config::{CrawlConfig, load_config};
use error::{CrawlError, Result};
use factcheck::cache::{ClassificationCache, MemoryStore, VerdictStore};
use factcheck::{FactCheckDispatcher, Registry, is_fact_checked};
use fetch::{Fetcher, HttpTransport, PageFetch, cancellation};
use models::Source;
use results::classic::ClassicResults;
use utils::ensure_writable_dir;
use walker::PaginationWalker;

#[tokio::main]
#[instrument]
async fn main() -> std::result::Result<(), Box<dyn Error>> {
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
    info!("image_sources starting up");

    let args = Cli::parse();
    debug!(?args.command, config = ?args.config, "Parsed CLI arguments");

    if let Err(e) = run(args).await {
        error!(error = %e, "Run aborted");
        return Err(e.into());
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

async fn run(args: Cli) -> Result<()> {
    let mut config = load_config(args.config.as_deref()).await?;

    match args.command {
        Command::Collect {
            json_folder,
            min_share,
            limit,
            concurrency,
            crawl,
        } => {
            crawl.apply(&mut config);
            config.validate()?;
            let fetcher = build_fetcher(&config)?;
            collect_folder(&fetcher, &config, &json_folder, min_share, limit, concurrency).await
        }
        Command::CollectCsv {
            csv,
            concurrency,
            crawl,
        } => {
            crawl.apply(&mut config);
            config.validate()?;
            let fetcher = build_fetcher(&config)?;
            collect_csv(&fetcher, &config, &csv, concurrency).await
        }
        Command::FactCheck {
            json_folder,
            cache_file,
            concurrency,
            crawl,
        } => {
            crawl.apply(&mut config);
            config.validate()?;
            let fetcher = build_fetcher(&config)?;
            fact_check_folder(&fetcher, &json_folder, cache_file.as_deref(), concurrency).await
        }
        Command::Links {
            json_file,
            n_images,
        } => {
            let batch = read_batch(&json_file).await?;
            for (_, link) in search_links(&batch, n_images, &config) {
                println!("{link}");
            }
            Ok(())
        }
        Command::Inspect { json_folder } => inspect_folder(&json_folder).await,
        Command::Meta { urls } => {
            config.validate()?;
            let fetcher = build_fetcher(&config)?;
            for url in urls {
                match metadata::fetch_metadata(&fetcher, &url).await {
                    Ok(meta) => println!("{}", to_pretty_json(&meta)?),
                    Err(CrawlError::Rejected { status, .. }) => {
                        warn!(%url, status, "Page refused; no metadata");
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        }
    }
}

/// One fetcher per run, cancelled on Ctrl-C.
fn build_fetcher(config: &CrawlConfig) -> Result<Fetcher<HttpTransport>> {
    let transport = HttpTransport::new(&config.user_agent, config.request_timeout())?;
    let (canceller, signal) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling outstanding requests");
            canceller.cancel();
        }
    });
    info!(
        sleep_min = config.sleep_min,
        sleep_max = config.sleep_max,
        max_attempts = ?config.max_attempts,
        "Fetcher ready"
    );
    Ok(Fetcher::new(
        transport,
        config.rate_limit(),
        config.retry_policy(),
        &config.time_window_query,
    )
    .with_cancel(signal))
}

fn search_base(config: &CrawlConfig) -> Result<Url> {
    let base = config.search_base();
    Url::parse(&base).map_err(|source| CrawlError::InvalidUrl { url: base, source })
}

/// Collect sources for a list of (key, search URL) pairs, `concurrency` at a time.
///
/// The first fatal error stops the whole list.
async fn collect_many<K>(
    walker: &PaginationWalker<'_, Fetcher<HttpTransport>, ClassicResults>,
    targets: Vec<(K, String)>,
    page_budget: usize,
    concurrency: usize,
) -> Result<Vec<(K, Vec<Source>)>> {
    let today = Local::now().date_naive();
    stream::iter(targets)
        .map(|(key, url)| async move {
            let sources = walker.collect_sources(&url, page_budget, today).await?;
            Ok::<_, CrawlError>((key, sources))
        })
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await
}

#[instrument(level = "info", skip(fetcher, config), fields(folder = %json_folder.display()))]
async fn collect_folder(
    fetcher: &Fetcher<HttpTransport>,
    config: &CrawlConfig,
    json_folder: &Path,
    min_share: i64,
    limit: usize,
    concurrency: usize,
) -> Result<()> {
    let out_dir = json_folder.join(SOURCES_DIR);
    ensure_writable_dir(&out_dir).await?;

    let adapter = ClassicResults::new(&config.section_marker);
    let walker = PaginationWalker::new(fetcher, &adapter, search_base(config)?);

    for path in list_batch_files(json_folder).await? {
        let mut batch = read_batch(&path).await?;
        let targets: Vec<(u64, String)> = search_links(&batch, limit, config)
            .into_iter()
            .filter(|(n, _)| batch.get(n).is_some_and(|img| img.shareNumber >= min_share))
            .collect();
        info!(file = %path.display(), images = targets.len(), "Collecting batch");

        let collected = collect_many(&walker, targets, config.pages, concurrency).await?;
        let mut checked = 0;
        for (n, sources) in collected {
            if let Some(image) = batch.get_mut(&n) {
                let flagged = is_fact_checked(&sources);
                checked += usize::from(flagged);
                debug!(
                    image = n,
                    sources = sources.len(),
                    dated = sources.iter().filter(|s| s.has_date()).count(),
                    "Image collected"
                );
                image.fact_checked = Some(flagged);
                image.sources = Some(sources);
            }
        }
        info!(file = %path.display(), fact_checked = checked, "Batch collected");

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        write_json(&batch, &out_dir.join(sources_file_name(&name))).await?;
    }
    Ok(())
}

#[instrument(level = "info", skip(fetcher, config), fields(csv = %csv.display()))]
async fn collect_csv(
    fetcher: &Fetcher<HttpTransport>,
    config: &CrawlConfig,
    csv: &Path,
    concurrency: usize,
) -> Result<()> {
    let ids = read_csv_ids(csv).await?;
    info!(images = ids.len(), "Read image ids");

    let adapter = ClassicResults::new(&config.section_marker);
    let walker = PaginationWalker::new(fetcher, &adapter, search_base(config)?);
    let targets = ids
        .into_iter()
        .map(|id| {
            let url = config.search_url(&id);
            (id, url)
        })
        .collect();

    let collected: BTreeMap<String, Vec<Source>> =
        collect_many(&walker, targets, config.pages, concurrency)
            .await?
            .into_iter()
            .collect();
    write_json(&collected, &csv_output_path(csv)).await
}

#[instrument(level = "info", skip(fetcher), fields(folder = %json_folder.display()))]
async fn fact_check_folder(
    fetcher: &Fetcher<HttpTransport>,
    json_folder: &Path,
    cache_file: Option<&Path>,
    concurrency: usize,
) -> Result<()> {
    let out_dir = json_folder.join(FACT_CHECKS_DIR);
    ensure_writable_dir(&out_dir).await?;

    let store = match cache_file {
        Some(path) => MemoryStore::from_entries(load_verdict_cache(path).await?),
        None => MemoryStore::default(),
    };
    let registry = Registry::standard();
    info!(sites = registry.len(), cached = store.len(), "Fact-check registry ready");
    let dispatcher = FactCheckDispatcher::new(fetcher, registry, ClassificationCache::new(store));

    let outcome = classify_batches(&dispatcher, json_folder, &out_dir, concurrency).await;

    let cache = dispatcher.cache();
    info!(hits = cache.hits(), misses = cache.misses(), "Classification cache");
    if let Some(path) = cache_file {
        write_json(&cache.store().entries(), path).await?;
    }
    outcome
}

/// Classify the flagged images of every batch in `batch_dir`, writing each
/// batch under the same name into `out_dir`.
async fn classify_batches<F: PageFetch>(
    dispatcher: &FactCheckDispatcher<'_, F>,
    batch_dir: &Path,
    out_dir: &Path,
    concurrency: usize,
) -> Result<()> {
    for (path, mut batch) in read_batches(batch_dir).await? {
        let flagged: Vec<(u64, Vec<Source>)> = batch
            .iter()
            .filter(|(_, image)| image.fact_checked == Some(true))
            .filter_map(|(n, image)| image.sources.clone().map(|s| (*n, s)))
            .collect();
        info!(file = %path.display(), images = flagged.len(), "Classifying batch");

        let verdicts: Vec<_> = stream::iter(flagged)
            .map(|(n, sources)| async move {
                let verdicts = dispatcher.classify(&sources).await?;
                Ok::<_, CrawlError>((n, verdicts))
            })
            .buffer_unordered(concurrency.max(1))
            .try_collect()
            .await?;
        for (n, map) in verdicts {
            if let Some(image) = batch.get_mut(&n) {
                image.fact_check = Some(map);
            }
        }

        if let Some(name) = path.file_name() {
            write_json(&batch, &out_dir.join(name)).await?;
        }
    }
    Ok(())
}

#[instrument(level = "info", fields(folder = %json_folder.display()))]
async fn inspect_folder(json_folder: &Path) -> Result<()> {
    let batches = read_batches(json_folder).await?;

    println!("FREQUENCY\tDOMAIN");
    for (count, domain) in domain_frequency(batches.iter().map(|(_, batch)| batch)) {
        println!("{count}\t{domain}");
    }
    Ok(())
}
