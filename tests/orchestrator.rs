use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;

use mt_dataset_downloader::cache::CacheStore;
use mt_dataset_downloader::domain::{
    DatasetFamily, DatasetInfo, DatasetSpec, DownloadDescriptor, DownloadResult,
};
use mt_dataset_downloader::engine::{DownloadEngine, EngineOptions};
use mt_dataset_downloader::error::DatasetError;
use mt_dataset_downloader::extract::Extractor;
use mt_dataset_downloader::fetch::{FetchResponse, Fetcher};
use mt_dataset_downloader::orchestrator::DatasetOrchestrator;
use mt_dataset_downloader::resolver::{ResolverRegistry, UrlResolver};
use mt_dataset_downloader::resolvers::{EuroparlResolver, NewsCommentaryResolver};
use mt_dataset_downloader::retry::RetryPolicy;

#[derive(Default)]
struct MockFetcher {
    routes: HashMap<String, Vec<u8>>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    fn route(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.routes.insert(url.to_string(), body.into());
        self
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Fetcher for MockFetcher {
    fn get(&self, url: &str) -> Result<FetchResponse, DatasetError> {
        self.calls.lock().unwrap().push(url.to_string());
        Ok(match self.routes.get(url) {
            Some(body) => FetchResponse {
                status: 200,
                content_length: Some(body.len() as u64),
                body: Box::new(Cursor::new(body.clone())),
            },
            None => FetchResponse {
                status: if url.contains("listing") { 503 } else { 404 },
                content_length: None,
                body: Box::new(io::empty()),
            },
        })
    }
}

/// Yields one file per configured name, no parameters accepted.
struct FixedResolver {
    base: &'static str,
    files: &'static [&'static str],
}

impl UrlResolver for FixedResolver {
    fn resolve(&self, spec: &DatasetSpec) -> Result<Vec<DownloadDescriptor>, DatasetError> {
        Ok(self
            .files
            .iter()
            .map(|file| spec.descriptor(format!("{}/{file}", self.base), *file))
            .collect())
    }

    fn describe(&self, dataset_id: &str) -> DatasetInfo {
        DatasetInfo {
            id: dataset_id.to_string(),
            description: "fixture".to_string(),
            family: DatasetFamily::FixedUrl,
            language_pairs: Vec::new(),
            categories: Vec::new(),
        }
    }
}

struct FailingExtractor {
    calls: Mutex<Vec<PathBuf>>,
}

impl Extractor for FailingExtractor {
    fn extract(&self, archive: &Path) -> Result<Vec<PathBuf>, DatasetError> {
        self.calls.lock().unwrap().push(archive.to_path_buf());
        Err(DatasetError::Extraction {
            path: archive.to_path_buf(),
            reason: "corrupt archive".to_string(),
        })
    }
}

fn gzip(content: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

fn mock_fetcher() -> MockFetcher {
    MockFetcher::default()
        .route("http://mock/europarl/de-en.tgz", "europarl de-en")
        .route("http://mock/europarl/fr-en.tgz", "europarl fr-en")
        .route("http://mock/fixture/a.tsv", "alpha")
        .route("http://mock/fixture/b.tsv", "beta")
        .route("http://mock/fixture/c.tsv.gz", gzip(b"gamma\n"))
        .route("http://mock/wmt13/dev.tgz", "dev 2013")
        .route("http://mock/wmt14/dev.tgz", "dev 2014")
}

fn orchestrator(fetcher: &Arc<MockFetcher>, cache_root: &Path) -> DatasetOrchestrator {
    let mut registry = ResolverRegistry::new();
    registry.register(
        "europarl-v7",
        EuroparlResolver::v7().with_base_url("http://mock/europarl"),
    );
    registry.register(
        "fixture",
        FixedResolver {
            base: "http://mock/fixture",
            files: &["a.tsv", "b.tsv", "c.tsv.gz"],
        },
    );
    registry.register(
        "broken",
        FixedResolver {
            base: "http://mock/fixture",
            files: &["a.tsv", "missing.tsv"],
        },
    );
    registry.register(
        "dev-2013",
        FixedResolver {
            base: "http://mock/wmt13",
            files: &["dev.tgz"],
        },
    );
    registry.register(
        "dev-2014",
        FixedResolver {
            base: "http://mock/wmt14",
            files: &["dev.tgz"],
        },
    );
    registry.register(
        "news-commentary-v15",
        NewsCommentaryResolver::new("v15", fetcher.clone(), RetryPolicy::no_delay(2))
            .with_base_url("http://mock/listing/"),
    );

    let cache = Arc::new(CacheStore::open(cache_root.to_str().unwrap()).unwrap());
    let options = EngineOptions {
        max_workers: 3,
        retry: RetryPolicy::no_delay(2),
        integrity_retries: 1,
        force: false,
    };
    let engine = DownloadEngine::new(fetcher.clone(), cache, options);
    DatasetOrchestrator::new(registry, engine)
}

#[test]
fn second_download_is_served_from_cache() {
    let temp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(mock_fetcher());
    let orchestrator = orchestrator(&fetcher, &temp.path().join("cache"));
    let spec = DatasetSpec::new("fixture", temp.path().join("fixture"));

    let first = orchestrator.download(&spec).unwrap();
    assert_eq!(first.success_count(), 3);
    assert!(first.extracted_paths.is_none());
    let fetched = fetcher.call_count();
    assert_eq!(fetched, 3);

    let second = orchestrator.download(&spec).unwrap();
    assert!(second.files.iter().all(DownloadResult::from_cache));
    assert_eq!(fetcher.call_count(), fetched);

    let third = orchestrator.download(&spec).unwrap();
    assert_eq!(second, third);
    assert_eq!(orchestrator.cache_stats().entry_count, 3);
}

#[test]
fn europarl_resolution_is_deterministic_and_offline() {
    let temp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(mock_fetcher());
    let orchestrator = orchestrator(&fetcher, &temp.path().join("cache"));
    let spec =
        DatasetSpec::new("europarl-v7", "/data/europarl").with_param("language_pair", "de-en");

    let first = orchestrator.registry().resolve(&spec).unwrap();
    let second = orchestrator.registry().resolve(&spec).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].url, "http://mock/europarl/de-en.tgz");
    assert_eq!(fetcher.call_count(), 0);
}

#[test]
fn sibling_datasets_are_isolated() {
    let temp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(mock_fetcher());
    let orchestrator = orchestrator(&fetcher, &temp.path().join("cache"));
    let specs = vec![
        DatasetSpec::new("broken", temp.path().join("broken")),
        DatasetSpec::new("europarl-v7", temp.path().join("europarl"))
            .with_param("language_pair", "en-fr"),
    ];

    let manifests = orchestrator.download_many(&specs).unwrap();
    assert_eq!(manifests.len(), 2);

    let broken = &manifests["broken"];
    assert_eq!(broken.success_count(), 1);
    assert_matches!(
        &broken.files[1],
        DownloadResult::Failure { url, retryable: false, .. } if url == "http://mock/fixture/missing.tsv"
    );
    assert!(!broken.is_complete());

    let europarl = &manifests["europarl-v7"];
    assert!(europarl.is_complete());
    assert!(temp.path().join("europarl/fr-en.tgz").exists());
}

#[test]
fn unknown_dataset_fails_before_any_transfer() {
    let temp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(mock_fetcher());
    let orchestrator = orchestrator(&fetcher, &temp.path().join("cache"));
    let specs = vec![
        DatasetSpec::new("fixture", temp.path().join("fixture")),
        DatasetSpec::new("opus-100", temp.path().join("opus")),
    ];

    let err = orchestrator.download_many(&specs).unwrap_err();
    assert_matches!(err, DatasetError::UnknownDataset(id) if id == "opus-100");
    assert_eq!(fetcher.call_count(), 0);
}

#[test]
fn bad_parameters_fail_before_any_transfer() {
    let temp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(mock_fetcher());
    let orchestrator = orchestrator(&fetcher, &temp.path().join("cache"));
    let specs = vec![
        DatasetSpec::new("fixture", temp.path().join("fixture")),
        DatasetSpec::new("europarl-v7", temp.path().join("europarl"))
            .with_param("language_pair", "ja-en"),
    ];

    assert_matches!(
        orchestrator.download_many(&specs),
        Err(DatasetError::Resolution { .. })
    );
    assert_eq!(fetcher.call_count(), 0);
}

#[test]
fn listing_outage_becomes_manifest_failure() {
    let temp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(mock_fetcher());
    let orchestrator = orchestrator(&fetcher, &temp.path().join("cache"));
    let specs = vec![
        DatasetSpec::new("news-commentary-v15", temp.path().join("nc")),
        DatasetSpec::new("fixture", temp.path().join("fixture")),
    ];

    let manifests = orchestrator.download_many(&specs).unwrap();
    let news = &manifests["news-commentary-v15"];
    assert_eq!(news.files.len(), 1);
    assert_matches!(
        &news.files[0],
        DownloadResult::Failure { url, retryable: true, .. } if url == "http://mock/listing/"
    );
    assert!(manifests["fixture"].is_complete());
}

#[test]
fn repeated_dataset_ids_merge_in_order() {
    let temp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(mock_fetcher());
    let orchestrator = orchestrator(&fetcher, &temp.path().join("cache"));
    let target = temp.path().join("ep");
    let specs = vec![
        DatasetSpec::new("europarl-v7", &target).with_param("language_pair", "de-en"),
        DatasetSpec::new("europarl-v7", &target).with_param("language_pair", "fr-en"),
    ];

    let manifests = orchestrator.download_many(&specs).unwrap();
    let europarl = &manifests["europarl-v7"];
    let names: Vec<_> = europarl
        .files
        .iter()
        .map(|file| {
            let name = file.path().unwrap().file_name().unwrap();
            name.to_string_lossy().into_owned()
        })
        .collect();
    assert_eq!(names, vec!["de-en.tgz", "fr-en.tgz"]);
}

#[test]
fn extraction_failure_keeps_cache_entry() {
    let temp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(mock_fetcher());
    let extractor = Arc::new(FailingExtractor {
        calls: Mutex::new(Vec::new()),
    });
    let orchestrator =
        orchestrator(&fetcher, &temp.path().join("cache")).with_extractor(extractor.clone());
    let spec = DatasetSpec::new("europarl-v7", temp.path().join("ep"))
        .with_param("language_pair", "de-en")
        .with_extract(true);

    let manifest = orchestrator.download(&spec).unwrap();
    assert_eq!(manifest.success_count(), 1);
    assert_eq!(manifest.extracted_paths, Some(Vec::new()));
    assert_eq!(manifest.extraction_failures.len(), 1);
    assert!(manifest.extraction_failures[0].reason.contains("corrupt archive"));
    assert!(!manifest.is_complete());
    assert_eq!(extractor.calls.lock().unwrap().len(), 1);

    assert_eq!(orchestrator.cache_stats().entry_count, 1);
    assert!(temp.path().join("ep/de-en.tgz").exists());
}

#[test]
fn archives_are_extracted_next_to_download() {
    let temp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(mock_fetcher());
    let orchestrator = orchestrator(&fetcher, &temp.path().join("cache"));
    let spec = DatasetSpec::new("fixture", temp.path().join("fixture")).with_extract(true);

    let manifest = orchestrator.download(&spec).unwrap();
    assert!(manifest.is_complete());
    assert_eq!(
        manifest.extracted_paths,
        Some(vec![temp.path().join("fixture/c.tsv")])
    );
    assert_eq!(
        std::fs::read_to_string(temp.path().join("fixture/c.tsv")).unwrap(),
        "gamma\n"
    );
}

#[test]
fn datasets_writing_different_files_to_one_target_are_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(mock_fetcher());
    let orchestrator = orchestrator(&fetcher, &temp.path().join("cache"));
    let shared = temp.path().join("wmt");

    let err = orchestrator
        .download_many(&[
            DatasetSpec::new("dev-2013", &shared),
            DatasetSpec::new("dev-2014", &shared),
        ])
        .unwrap_err();
    assert_matches!(
        err,
        DatasetError::Resolution { ref dataset_id, .. } if dataset_id == "dev-2014"
    );
    assert_eq!(fetcher.call_count(), 0);
    assert!(!shared.join("dev.tgz").exists());

    let manifests = orchestrator
        .download_many(&[
            DatasetSpec::new("dev-2013", temp.path().join("wmt13")),
            DatasetSpec::new("dev-2014", temp.path().join("wmt14")),
        ])
        .unwrap();
    assert_eq!(manifests["dev-2013"].success_count(), 1);
    assert_eq!(manifests["dev-2014"].success_count(), 1);
}

#[test]
fn datasets_sharing_an_artifact_may_share_a_target() {
    let temp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(mock_fetcher());
    let orchestrator = orchestrator(&fetcher, &temp.path().join("cache"));
    let shared = temp.path().join("shared");

    let manifests = orchestrator
        .download_many(&[
            DatasetSpec::new("fixture", &shared),
            DatasetSpec::new("broken", &shared),
        ])
        .unwrap();
    assert_eq!(manifests["fixture"].success_count(), 3);
    assert_eq!(manifests["broken"].success_count(), 1);
    assert_eq!(std::fs::read(shared.join("a.tsv")).unwrap(), b"alpha");
}
