//! Batch files in and out.
//!
//! # Layout
//!
//! ```text
//! json_folder/
//! ├── images_data_Out21.json       input batches ("1", "2", … → image)
//! └── sources/
//!     ├── images_sources_Out21.json   same images, with sources
//!     └── fact_checks/
//!         └── images_sources_Out21.json   same images, with verdicts
//! ```
//!
//! Output JSON is pretty-printed with four-space indentation and numeric key
//! order.

use crate::config::CrawlConfig;
use crate::error::Result;
use crate::models::{Batch, Verdict};
use itertools::Itertools;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

pub const SOURCES_DIR: &str = "sources";
pub const FACT_CHECKS_DIR: &str = "fact_checks";

/// `*.json` files directly inside `dir`, sorted by name.
#[instrument(level = "info", skip_all, fields(dir = %dir.display()))]
pub async fn list_batch_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file()
            && path.extension().is_some_and(|ext| ext == "json")
        {
            files.push(path);
        }
    }
    files.sort();
    info!(count = files.len(), "Found batch files");
    Ok(files)
}

pub async fn read_batch(path: &Path) -> Result<Batch> {
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

/// Every batch file directly inside `dir`, with its path.
pub async fn read_batches(dir: &Path) -> Result<Vec<(PathBuf, Batch)>> {
    let mut batches = Vec::new();
    for path in list_batch_files(dir).await? {
        let batch = read_batch(&path).await?;
        batches.push((path, batch));
    }
    Ok(batches)
}

/// Serialize with four-space indentation.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    // serde_json only ever writes UTF-8
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[instrument(level = "info", skip(value), fields(path = %path.display()))]
pub async fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let json = to_pretty_json(value)?;
    fs::write(path, json).await?;
    info!("Wrote JSON file");
    Ok(())
}

/// Name of the sources file produced from a batch file.
pub fn sources_file_name(batch_file_name: &str) -> String {
    batch_file_name.replace("data", "sources")
}

/// Search URLs for the images of a batch.
///
/// With `limit == 0` every image is included; otherwise images `1..=limit`,
/// stopping at the first number missing from the batch.
pub fn search_links(batch: &Batch, limit: usize, config: &CrawlConfig) -> Vec<(u64, String)> {
    if limit == 0 {
        return batch
            .iter()
            .map(|(n, image)| (*n, config.search_url(&image.imageID)))
            .collect();
    }
    (1..=limit as u64)
        .map_while(|n| batch.get(&n).map(|image| (n, config.search_url(&image.imageID))))
        .collect()
}

/// Image ids from the first comma-separated column of each row.
pub async fn read_csv_ids(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path).await?;
    Ok(parse_csv_ids(&raw))
}

fn parse_csv_ids(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(|row| row.split(',').next())
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

/// `<stem>_sources.json` next to the CSV file, where the stem ends at the
/// first dot of the file name.
pub fn csv_output_path(csv: &Path) -> PathBuf {
    let name = csv
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.split('.').next().unwrap_or_default();
    csv.with_file_name(format!("{}_sources.json", stem))
}

/// Load a saved classification cache; a missing file is an empty cache.
pub async fn load_verdict_cache(path: &Path) -> Result<BTreeMap<String, Verdict>> {
    match fs::read_to_string(path).await {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}

/// How many collected sources point at each site, most frequent first.
pub fn domain_frequency<'a>(batches: impl IntoIterator<Item = &'a Batch>) -> Vec<(usize, String)> {
    let mut freq: HashMap<String, usize> = HashMap::new();
    for batch in batches {
        for source in batch
            .values()
            .filter_map(|image| image.sources.as_ref())
            .flatten()
        {
            if let Some(domain) = source.domain() {
                *freq.entry(domain).or_insert(0) += 1;
            }
        }
    }
    freq.into_iter()
        .map(|(domain, count)| (count, domain))
        .sorted_by(|a, b| b.cmp(a))
        .collect()
}
