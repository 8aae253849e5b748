use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::domain::{DatasetFamily, DatasetInfo, DatasetSpec, DownloadDescriptor};
use crate::error::DatasetError;
use crate::fetch::{Fetcher, fetch_text};
use crate::listing::parse_listing;
use crate::resolver::UrlResolver;
use crate::resolvers::reject_unknown;
use crate::retry::RetryPolicy;

// Pairs differ between releases, so they are read from the directory listing.
#[derive(Clone)]
pub struct NewsCommentaryResolver {
    version: String,
    base_url: String,
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
}

impl NewsCommentaryResolver {
    pub fn new(version: impl Into<String>, fetcher: Arc<dyn Fetcher>, retry: RetryPolicy) -> Self {
        let version = version.into();
        Self {
            base_url: format!("https://data.statmt.org/news-commentary/{version}/training/"),
            version,
            fetcher,
            retry,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// `{pair} -> (filename, url)`; a `.tsv.gz` wins over a plain `.tsv`.
    fn discover(
        &self,
        dataset_id: &str,
    ) -> Result<BTreeMap<String, (String, String)>, DatasetError> {
        let html = self.retry.run(&self.base_url, |_| {
            fetch_text(self.fetcher.as_ref(), &self.base_url)
        })?;
        let entries = parse_listing(&self.base_url, &html)?;

        let pattern = Regex::new(&format!(
            r"^news-commentary-{}\.([a-z]{{2,3}}-[a-z]{{2,3}})\.tsv(\.gz)?$",
            regex::escape(&self.version)
        ))
        .map_err(|err| DatasetError::resolution(dataset_id, err.to_string()))?;

        let mut files: BTreeMap<String, (String, String)> = BTreeMap::new();
        for entry in entries.into_iter().filter(|entry| entry.is_file()) {
            let Some(captures) = pattern.captures(&entry.name) else {
                continue;
            };
            let pair = captures[1].to_string();
            let compressed = captures.get(2).is_some();
            let replace = match files.get(&pair) {
                Some((existing, _)) => compressed && !is_gz(existing),
                None => true,
            };
            if replace {
                files.insert(pair, (entry.name, entry.url));
            }
        }
        debug!(url = %self.base_url, pairs = files.len(), "listing parsed");
        Ok(files)
    }
}

fn is_gz(name: &str) -> bool {
    name.ends_with(".gz")
}

impl UrlResolver for NewsCommentaryResolver {
    fn resolve(&self, spec: &DatasetSpec) -> Result<Vec<DownloadDescriptor>, DatasetError> {
        reject_unknown(spec, &["language_pair"])?;
        let requested = spec.language_pair()?;
        let files = self.discover(&spec.dataset_id)?;
        if files.is_empty() {
            return Err(DatasetError::resolution(
                &spec.dataset_id,
                format!("no corpus files listed at {}", self.base_url),
            ));
        }

        match requested {
            Some(pair) => {
                let (filename, url) = files
                    .get(&pair.to_string())
                    .or_else(|| files.get(&pair.reversed().to_string()))
                    .ok_or_else(|| {
                        DatasetError::resolution(
                            &spec.dataset_id,
                            format!(
                                "language pair {pair} is not available (available: {})",
                                files.keys().cloned().collect::<Vec<_>>().join(", ")
                            ),
                        )
                    })?;
                Ok(vec![spec.descriptor(url.clone(), filename.clone())])
            }
            None => Ok(files
                .into_values()
                .map(|(filename, url)| spec.descriptor(url, filename))
                .collect()),
        }
    }

    fn describe(&self, dataset_id: &str) -> DatasetInfo {
        DatasetInfo {
            id: dataset_id.to_string(),
            description: format!(
                "News Commentary {} parallel corpus (pairs discovered from the release listing)",
                self.version
            ),
            family: DatasetFamily::ListingPage,
            language_pairs: Vec::new(),
            categories: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;
    use crate::fetch::FetchResponse;

    const LISTING: &str = r#"<html><body><pre>
<a href="../">Parent Directory</a>
<a href="news-commentary-v15.de-en.tsv">news-commentary-v15.de-en.tsv</a>
<a href="news-commentary-v15.de-en.tsv.gz">news-commentary-v15.de-en.tsv.gz</a>
<a href="news-commentary-v15.en-zh.tsv.gz">news-commentary-v15.en-zh.tsv.gz</a>
<a href="news-commentary-v14.de-en.tsv.gz">news-commentary-v14.de-en.tsv.gz</a>
<a href="README">README</a>
</pre></body></html>"#;

    struct ListingFetcher {
        failures_before_success: Mutex<u32>,
        calls: Mutex<u32>,
    }

    impl ListingFetcher {
        fn new(failures_before_success: u32) -> Self {
            Self {
                failures_before_success: Mutex::new(failures_before_success),
                calls: Mutex::new(0),
            }
        }
    }

    impl Fetcher for ListingFetcher {
        fn get(&self, _url: &str) -> Result<FetchResponse, DatasetError> {
            *self.calls.lock().unwrap() += 1;
            let mut remaining = self.failures_before_success.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(FetchResponse {
                    status: 503,
                    content_length: None,
                    body: Box::new(Cursor::new(Vec::new())),
                });
            }
            Ok(FetchResponse {
                status: 200,
                content_length: Some(LISTING.len() as u64),
                body: Box::new(Cursor::new(LISTING.as_bytes().to_vec())),
            })
        }
    }

    fn resolver(fetcher: Arc<ListingFetcher>) -> NewsCommentaryResolver {
        NewsCommentaryResolver::new("v15", fetcher, RetryPolicy::no_delay(3))
    }

    #[test]
    fn discovers_all_pairs_preferring_gzip() {
        let fetcher = Arc::new(ListingFetcher::new(0));
        let spec = DatasetSpec::new("news-commentary-v15", "/data");
        let files = resolver(fetcher).resolve(&spec).unwrap();
        let names: Vec<_> = files.iter().map(|file| file.filename.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "news-commentary-v15.de-en.tsv.gz",
                "news-commentary-v15.en-zh.tsv.gz"
            ]
        );
    }

    #[test]
    fn filters_by_pair_in_either_direction() {
        let fetcher = Arc::new(ListingFetcher::new(0));
        let spec =
            DatasetSpec::new("news-commentary-v15", "/data").with_param("language_pair", "zh-en");
        let files = resolver(fetcher).resolve(&spec).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "news-commentary-v15.en-zh.tsv.gz");
    }

    #[test]
    fn unavailable_pair_is_resolution_error() {
        let fetcher = Arc::new(ListingFetcher::new(0));
        let spec =
            DatasetSpec::new("news-commentary-v15", "/data").with_param("language_pair", "ru-en");
        assert_matches!(
            resolver(fetcher).resolve(&spec),
            Err(DatasetError::Resolution { .. })
        );
    }

    #[test]
    fn listing_fetch_is_retried() {
        let fetcher = Arc::new(ListingFetcher::new(2));
        let spec = DatasetSpec::new("news-commentary-v15", "/data");
        let files = resolver(fetcher.clone()).resolve(&spec).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(*fetcher.calls.lock().unwrap(), 3);
    }

    #[test]
    fn listing_failure_surfaces_as_network_error() {
        let fetcher = Arc::new(ListingFetcher::new(10));
        let spec = DatasetSpec::new("news-commentary-v15", "/data");
        let err = resolver(fetcher).resolve(&spec).unwrap_err();
        assert_matches!(err, DatasetError::HttpStatus { status: 503, .. });
        assert!(!err.is_request_error());
    }
}
