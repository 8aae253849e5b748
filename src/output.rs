use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::cache::{CacheEntry, CacheStats};
use crate::domain::{DatasetInfo, DatasetManifest, DownloadResult};
use crate::engine::{ProgressEvent, ProgressSink};

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogResult<'a> {
    pub datasets: &'a [DatasetInfo],
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheReport<'a> {
    pub root: &'a str,
    pub stats: CacheStats,
    pub entries: &'a [CacheEntry],
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub removed: usize,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_catalog(datasets: &[DatasetInfo]) -> io::Result<()> {
        Self::print_json(&CatalogResult { datasets })
    }

    pub fn print_manifests(manifests: &BTreeMap<String, DatasetManifest>) -> io::Result<()> {
        Self::print_json(manifests)
    }

    pub fn print_cache(report: &CacheReport<'_>) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_clear(result: &ClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub fn print_catalog(datasets: &[DatasetInfo]) {
    println!("{CYAN}Registered datasets{RESET}");
    for dataset in datasets {
        println!("  {GREEN}{}{RESET}  [{}] {}", dataset.id, dataset.family, dataset.description);
        if !dataset.language_pairs.is_empty() {
            println!("      pairs: {}", dataset.language_pairs.join(", "));
        }
        if !dataset.categories.is_empty() {
            println!("      categories: {}", dataset.categories.join(", "));
        }
    }
}

pub fn print_download_summary(manifests: &BTreeMap<String, DatasetManifest>) {
    let files: usize = manifests.values().map(|manifest| manifest.files.len()).sum();
    let failed: usize = manifests.values().map(DatasetManifest::failure_count).sum();
    let cached: usize = manifests
        .values()
        .flat_map(|manifest| &manifest.files)
        .filter(|file| file.from_cache())
        .count();

    println!("{CYAN}mtdl summary{RESET}");
    println!("{GREEN}files: {files} ({cached} from cache){RESET}");
    let color = if failed == 0 { GREEN } else { RED };
    println!("{color}errors: {failed}{RESET}");

    for manifest in manifests.values() {
        println!(
            "{CYAN}{}{RESET} {}/{} files",
            manifest.dataset_id,
            manifest.success_count(),
            manifest.files.len()
        );
        for file in &manifest.files {
            match file {
                DownloadResult::Success {
                    path,
                    size,
                    from_cache,
                } => {
                    let action = if *from_cache { "cached" } else { "downloaded" };
                    println!("{GREEN}   {action} {} ({size} bytes){RESET}", path.display());
                }
                DownloadResult::Failure {
                    url,
                    reason,
                    retryable,
                } => {
                    let hint = if *retryable { " (retryable)" } else { "" };
                    println!("{RED}   failed {url}: {reason}{hint}{RESET}");
                }
            }
        }
        if let Some(extracted) = &manifest.extracted_paths {
            println!("{GREEN}   extracted {} files{RESET}", extracted.len());
        }
        for failure in &manifest.extraction_failures {
            println!(
                "{YELLOW}   extraction failed {}: {}{RESET}",
                failure.archive.display(),
                failure.reason
            );
        }
    }
}

pub fn print_cache(report: &CacheReport<'_>) {
    println!("{CYAN}cache: {}{RESET}", report.root);
    println!(
        "{GREEN}{} entries, {} bytes{RESET}",
        report.stats.entry_count, report.stats.total_bytes
    );
    for entry in report.entries {
        println!(
            "   {} {} ({} bytes, {})",
            &entry.fingerprint[..12.min(entry.fingerprint.len())],
            entry.local_path.display(),
            entry.size,
            entry.completed_at.to_rfc3339()
        );
    }
}
