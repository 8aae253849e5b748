use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::domain::{DatasetInfo, DatasetSpec, DownloadDescriptor};
use crate::error::DatasetError;
use crate::fetch::Fetcher;
use crate::resolvers::{EuroparlResolver, NewsCommentaryResolver, UnCorpusResolver, WmtResolver};
use crate::retry::RetryPolicy;

/// Must be deterministic, and must fail with `Resolution` rather than return
/// an empty list for missing or unsupported parameters.
pub trait UrlResolver: Send + Sync {
    fn resolve(&self, spec: &DatasetSpec) -> Result<Vec<DownloadDescriptor>, DatasetError>;

    fn describe(&self, dataset_id: &str) -> DatasetInfo;
}

type VersionedFactory = Arc<dyn Fn(&str) -> Arc<dyn UrlResolver> + Send + Sync>;

/// Ids of the form `{prefix}v{N}` (or `{prefix}{N}`) that are not registered
/// explicitly are built on demand from the normalized version `v{N}`.
#[derive(Clone)]
struct VersionedFamily {
    prefix: String,
    build: VersionedFactory,
}

#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: BTreeMap<String, Arc<dyn UrlResolver>>,
    families: Vec<VersionedFamily>,
}

const NEWS_COMMENTARY_LISTED: [&str; 5] = ["v14", "v15", "v16", "v17", "v18"];

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Listing resolvers fetch their index pages through `fetcher`.
    pub fn with_builtins(fetcher: Arc<dyn Fetcher>, listing_retry: RetryPolicy) -> Self {
        let mut registry = Self::new();
        registry.register("europarl-v7", EuroparlResolver::v7());
        registry.register("un-corpus-v1.0", UnCorpusResolver);
        for version in NEWS_COMMENTARY_LISTED {
            registry.register(
                format!("news-commentary-{version}"),
                NewsCommentaryResolver::new(version, fetcher.clone(), listing_retry),
            );
        }
        registry.register_versioned("news-commentary-", move |version| {
            let resolver: Arc<dyn UrlResolver> = Arc::new(NewsCommentaryResolver::new(
                version,
                fetcher.clone(),
                listing_retry,
            ));
            resolver
        });
        registry.register("wmt13", WmtResolver::wmt13());
        registry.register("wmt14", WmtResolver::wmt14());
        registry
    }

    pub fn register<R>(&mut self, dataset_id: impl Into<String>, resolver: R)
    where
        R: UrlResolver + 'static,
    {
        self.register_arc(dataset_id, Arc::new(resolver));
    }

    pub fn register_arc(&mut self, dataset_id: impl Into<String>, resolver: Arc<dyn UrlResolver>) {
        let dataset_id = dataset_id.into();
        if self.resolvers.insert(dataset_id.clone(), resolver).is_some() {
            debug!(%dataset_id, "resolver replaced");
        }
    }

    pub fn register_versioned<F>(&mut self, prefix: impl Into<String>, build: F)
    where
        F: Fn(&str) -> Arc<dyn UrlResolver> + Send + Sync + 'static,
    {
        self.families.push(VersionedFamily {
            prefix: prefix.into(),
            build: Arc::new(build),
        });
    }

    /// Exact registrations win over versioned families.
    pub fn lookup(&self, dataset_id: &str) -> Result<Arc<dyn UrlResolver>, DatasetError> {
        if let Some(resolver) = self.resolvers.get(dataset_id) {
            return Ok(resolver.clone());
        }
        for family in &self.families {
            if let Some(version) = dataset_id
                .strip_prefix(family.prefix.as_str())
                .and_then(parse_version)
            {
                debug!(%dataset_id, %version, "resolver built from versioned family");
                return Ok((family.build)(&version));
            }
        }
        Err(DatasetError::UnknownDataset(dataset_id.to_string()))
    }

    pub fn list_ids(&self) -> BTreeSet<String> {
        self.resolvers.keys().cloned().collect()
    }

    pub fn catalog(&self) -> Vec<DatasetInfo> {
        self.resolvers
            .iter()
            .map(|(id, resolver)| resolver.describe(id))
            .collect()
    }

    pub fn resolve(&self, spec: &DatasetSpec) -> Result<Vec<DownloadDescriptor>, DatasetError> {
        let resolver = self.lookup(&spec.dataset_id)?;
        let descriptors = resolver.resolve(spec)?;
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if !seen.insert(descriptor.target_path.as_path()) {
                return Err(DatasetError::resolution(
                    &spec.dataset_id,
                    format!("duplicate target `{}`", descriptor.target_path.display()),
                ));
            }
        }
        debug!(dataset_id = %spec.dataset_id, files = descriptors.len(), "resolved");
        Ok(descriptors)
    }
}

/// `v17`, `V17` and `17` all become `v17`.
fn parse_version(raw: &str) -> Option<String> {
    let digits = raw.strip_prefix(['v', 'V']).unwrap_or(raw);
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    Some(format!("v{digits}"))
}
