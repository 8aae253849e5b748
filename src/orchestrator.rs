use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::CacheStats;
use crate::domain::{
    DatasetInfo, DatasetManifest, DatasetSpec, DownloadDescriptor, DownloadResult,
    ExtractionFailure,
};
use crate::engine::{AbortHandle, DownloadEngine, NoProgress, ProgressEvent, ProgressSink};
use crate::error::DatasetError;
use crate::extract::{ArchiveExtractor, Extractor};
use crate::resolver::ResolverRegistry;

struct Plan<'a> {
    spec: &'a DatasetSpec,
    files: Range<usize>,
    resolve_failure: Option<DownloadResult>,
}

pub struct DatasetOrchestrator {
    registry: ResolverRegistry,
    engine: DownloadEngine,
    extractor: Arc<dyn Extractor>,
}

impl DatasetOrchestrator {
    pub fn new(registry: ResolverRegistry, engine: DownloadEngine) -> Self {
        Self {
            registry,
            engine,
            extractor: Arc::new(ArchiveExtractor),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &DownloadEngine {
        &self.engine
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.engine.abort_handle()
    }

    pub fn catalog(&self) -> Vec<DatasetInfo> {
        self.registry.catalog()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.engine.cache().stats()
    }

    pub fn download(&self, spec: &DatasetSpec) -> Result<DatasetManifest, DatasetError> {
        self.download_with_progress(spec, &NoProgress)
    }

    pub fn download_with_progress(
        &self,
        spec: &DatasetSpec,
        sink: &dyn ProgressSink,
    ) -> Result<DatasetManifest, DatasetError> {
        let mut manifests = self.download_many_with_progress(std::slice::from_ref(spec), sink)?;
        Ok(manifests
            .remove(&spec.dataset_id)
            .unwrap_or_else(|| DatasetManifest::new(&spec.dataset_id)))
    }

    pub fn download_many(
        &self,
        specs: &[DatasetSpec],
    ) -> Result<BTreeMap<String, DatasetManifest>, DatasetError> {
        self.download_many_with_progress(specs, &NoProgress)
    }

    /// Resolves every spec up front, then sends all files through a single
    /// engine run. Unknown datasets and malformed parameters fail the whole
    /// call before anything is transferred; every other failure is recorded
    /// in the affected manifest.
    pub fn download_many_with_progress(
        &self,
        specs: &[DatasetSpec],
        sink: &dyn ProgressSink,
    ) -> Result<BTreeMap<String, DatasetManifest>, DatasetError> {
        let mut descriptors: Vec<DownloadDescriptor> = Vec::new();
        let mut plans = Vec::with_capacity(specs.len());

        for spec in specs {
            sink.event(ProgressEvent {
                message: format!("phase=Resolve; {}", spec.dataset_id),
                elapsed: None,
            });
            let start = descriptors.len();
            let resolve_failure = match self.registry.resolve(spec) {
                Ok(files) => {
                    descriptors.extend(files);
                    None
                }
                Err(err) if err.is_request_error() => return Err(err),
                Err(err) => {
                    warn!(dataset = %spec.dataset_id, error = %err, "resolution failed");
                    let url = err.url().unwrap_or(&spec.dataset_id).to_string();
                    Some(DownloadResult::failure(&url, &err))
                }
            };
            plans.push(Plan {
                spec,
                files: start..descriptors.len(),
                resolve_failure,
            });
        }
        check_shared_targets(&plans, &descriptors)?;

        info!(
            datasets = specs.len(),
            files = descriptors.len(),
            "starting downloads"
        );
        sink.event(ProgressEvent {
            message: format!("phase=Download; {} files", descriptors.len()),
            elapsed: None,
        });
        let results = self.engine.run_with_progress(&descriptors, sink);

        let mut manifests: BTreeMap<String, DatasetManifest> = BTreeMap::new();
        for plan in plans {
            let manifest = manifests
                .entry(plan.spec.dataset_id.clone())
                .or_insert_with(|| DatasetManifest::new(&plan.spec.dataset_id));
            manifest.files.extend(plan.resolve_failure);

            let files = &descriptors[plan.files.clone()];
            let outcomes = &results[plan.files];
            manifest.files.extend_from_slice(outcomes);

            if plan.spec.extract {
                self.extract_archives(manifest, files, outcomes, sink);
            }
        }
        Ok(manifests)
    }

    fn extract_archives(
        &self,
        manifest: &mut DatasetManifest,
        files: &[DownloadDescriptor],
        outcomes: &[DownloadResult],
        sink: &dyn ProgressSink,
    ) {
        let extracted = manifest.extracted_paths.get_or_insert_with(Vec::new);
        for (descriptor, outcome) in files.iter().zip(outcomes) {
            let Some(archive) = outcome.path() else {
                continue;
            };
            if !descriptor.is_archive() {
                continue;
            }
            sink.event(ProgressEvent {
                message: format!("phase=Extract; {}", descriptor.filename),
                elapsed: None,
            });
            match self.extractor.extract(archive) {
                Ok(paths) => extracted.extend(paths),
                Err(err) => {
                    warn!(archive = %archive.display(), error = %err, "extraction failed");
                    manifest.extraction_failures.push(ExtractionFailure {
                        archive: archive.to_path_buf(),
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}

/// Two datasets may share a target file only when they fetch the same
/// artifact.
fn check_shared_targets(
    plans: &[Plan<'_>],
    descriptors: &[DownloadDescriptor],
) -> Result<(), DatasetError> {
    let mut claimed: HashMap<PathBuf, (String, &str)> = HashMap::new();
    for plan in plans {
        for descriptor in &descriptors[plan.files.clone()] {
            let target = std::path::absolute(&descriptor.target_path)
                .unwrap_or_else(|_| descriptor.target_path.clone());
            let fingerprint = descriptor.fingerprint();
            match claimed.get(&target) {
                Some((existing, owner)) if *existing != fingerprint => {
                    return Err(DatasetError::resolution(
                        &plan.spec.dataset_id,
                        format!(
                            "{} is also written by `{owner}` with different content",
                            target.display()
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    claimed.insert(target, (fingerprint, plan.spec.dataset_id.as_str()));
                }
            }
        }
    }
    Ok(())
}
