use std::path::PathBuf;
use std::sync::Arc;

use assert_matches::assert_matches;

use mt_dataset_downloader::domain::{DatasetFamily, DatasetSpec};
use mt_dataset_downloader::error::DatasetError;
use mt_dataset_downloader::fetch::{FetchResponse, Fetcher};
use mt_dataset_downloader::resolver::ResolverRegistry;
use mt_dataset_downloader::retry::RetryPolicy;

/// Fails every request; fixed-URL resolvers must never reach it.
struct OfflineFetcher;

impl Fetcher for OfflineFetcher {
    fn get(&self, url: &str) -> Result<FetchResponse, DatasetError> {
        Err(DatasetError::Network {
            url: url.to_string(),
            message: "offline".to_string(),
            retryable: false,
        })
    }
}

fn registry() -> ResolverRegistry {
    ResolverRegistry::with_builtins(Arc::new(OfflineFetcher), RetryPolicy::no_delay(1))
}

#[test]
fn builtin_catalog() {
    let registry = registry();
    let ids: Vec<String> = registry.list_ids().into_iter().collect();
    assert_eq!(
        ids,
        vec![
            "europarl-v7",
            "news-commentary-v14",
            "news-commentary-v15",
            "news-commentary-v16",
            "news-commentary-v17",
            "news-commentary-v18",
            "un-corpus-v1.0",
            "wmt13",
            "wmt14",
        ]
    );

    let catalog = registry.catalog();
    let europarl = catalog.iter().find(|info| info.id == "europarl-v7").unwrap();
    assert_eq!(europarl.family, DatasetFamily::FixedUrl);
    assert!(europarl.language_pairs.contains(&"de-en".to_string()));
    let wmt = catalog.iter().find(|info| info.id == "wmt14").unwrap();
    assert_eq!(wmt.family, DatasetFamily::YearCategory);
}

#[test]
fn europarl_de_en_is_stable() {
    let registry = registry();
    let spec =
        DatasetSpec::new("europarl-v7", "/data/europarl").with_param("language_pair", "de-en");
    let first = registry.resolve(&spec).unwrap();
    for _ in 0..3 {
        assert_eq!(registry.resolve(&spec).unwrap(), first);
    }
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].url, "https://www.statmt.org/europarl/v7/de-en.tgz");
    assert_eq!(first[0].target_path, PathBuf::from("/data/europarl/de-en.tgz"));
}

#[test]
fn europarl_requires_language_pair() {
    let registry = registry();
    let spec = DatasetSpec::new("europarl-v7", "/data");
    assert_matches!(registry.resolve(&spec), Err(DatasetError::Resolution { .. }));
}

#[test]
fn misspelled_parameter_rejected() {
    let registry = registry();
    let spec = DatasetSpec::new("wmt13", "/data").with_param("categroy", "dev");
    assert_matches!(registry.resolve(&spec), Err(DatasetError::Resolution { .. }));
}

#[test]
fn listing_resolver_surfaces_network_error() {
    let registry = registry();
    let spec = DatasetSpec::new("news-commentary-v15", "/data");
    let err = registry.resolve(&spec).unwrap_err();
    assert_matches!(err, DatasetError::Network { .. });
    assert!(!err.is_request_error());
}

#[test]
fn any_news_commentary_version_resolves_through_its_listing() {
    let registry = registry();
    for (id, version) in [
        ("news-commentary-v12", "v12"),
        ("news-commentary-9", "v9"),
        ("news-commentary-V17", "v17"),
    ] {
        let listing = format!("https://data.statmt.org/news-commentary/{version}/training/");
        let err = registry.resolve(&DatasetSpec::new(id, "/data")).unwrap_err();
        assert_eq!(err.url(), Some(listing.as_str()));
    }
}

#[test]
fn unsupported_versions_are_unknown() {
    let registry = registry();
    for id in ["wmt16", "europarl-v8", "news-commentary-latest"] {
        let err = registry.resolve(&DatasetSpec::new(id, "/data")).unwrap_err();
        assert_matches!(err, DatasetError::UnknownDataset(ref unknown) if unknown == id);
    }
}
