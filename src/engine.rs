use std::collections::HashSet;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tempfile::Builder;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStore};
use crate::domain::{DownloadDescriptor, DownloadResult};
use crate::error::DatasetError;
use crate::fetch::{FetchResponse, Fetcher};
use crate::fs_util::{copy_file_atomic, ensure_parent, fs_err, parent_dir};
use crate::retry::RetryPolicy;

const CHUNK_SIZE: usize = 64 * 1024;
const ABORT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn event(&self, _event: ProgressEvent) {}
}

/// Caller-driven cancellation. Cloning shares the flag. A run that observed
/// the flag clears it on return, so the engine stays usable.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub max_workers: usize,
    pub retry: RetryPolicy,
    pub integrity_retries: u32,
    pub force: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_workers: 4,
            retry: RetryPolicy::default(),
            integrity_retries: 1,
            force: false,
        }
    }
}

pub struct DownloadEngine {
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<CacheStore>,
    options: EngineOptions,
    abort: AbortHandle,
}

impl DownloadEngine {
    pub fn new(fetcher: Arc<dyn Fetcher>, cache: Arc<CacheStore>, options: EngineOptions) -> Self {
        Self {
            fetcher,
            cache,
            options,
            abort: AbortHandle::new(),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn run(&self, descriptors: &[DownloadDescriptor]) -> Vec<DownloadResult> {
        self.run_with_progress(descriptors, &NoProgress)
    }

    /// Processes every descriptor and returns one result per descriptor, in
    /// input order. A failed file never stops its siblings.
    pub fn run_with_progress(
        &self,
        descriptors: &[DownloadDescriptor],
        sink: &dyn ProgressSink,
    ) -> Vec<DownloadResult> {
        if descriptors.is_empty() {
            return Vec::new();
        }
        let workers = self.options.max_workers.clamp(1, descriptors.len());
        let next = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<DownloadResult>>> =
            descriptors.iter().map(|_| Mutex::new(None)).collect();
        let refreshed = Mutex::new(HashSet::new());

        debug!(files = descriptors.len(), workers, "engine run");
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        if self.abort.is_aborted() {
                            break;
                        }
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(descriptor) = descriptors.get(index) else {
                            break;
                        };
                        let result = self.process(descriptor, &refreshed, sink);
                        *slots[index].lock().unwrap_or_else(PoisonError::into_inner) =
                            Some(result);
                    }
                });
            }
        });

        if self.abort.is_aborted() {
            debug!("run aborted, clearing abort flag");
            self.abort.reset();
        }

        slots
            .into_iter()
            .zip(descriptors)
            .map(|(slot, descriptor)| {
                slot.into_inner()
                    .unwrap_or_else(PoisonError::into_inner)
                    .unwrap_or_else(|| {
                        DownloadResult::failure(&descriptor.url, &DatasetError::Aborted)
                    })
            })
            .collect()
    }

    /// `refreshed` holds the fingerprints already re-downloaded in this run,
    /// so forced duplicates are fetched once.
    fn process(
        &self,
        descriptor: &DownloadDescriptor,
        refreshed: &Mutex<HashSet<String>>,
        sink: &dyn ProgressSink,
    ) -> DownloadResult {
        let fingerprint = descriptor.fingerprint();
        let _claim = self.cache.claim(&fingerprint);

        let use_cache = !self.options.force
            || refreshed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&fingerprint);
        if let Some(entry) = use_cache.then(|| self.cache.lookup(descriptor)).flatten() {
            return match self.materialize(descriptor, &entry) {
                Ok(path) => {
                    sink.event(ProgressEvent {
                        message: format!("cache hit {}", descriptor.filename),
                        elapsed: None,
                    });
                    DownloadResult::Success {
                        path,
                        size: entry.size,
                        from_cache: true,
                    }
                }
                Err(err) => DownloadResult::failure(&descriptor.url, &err),
            };
        }

        let start = Instant::now();
        sink.event(ProgressEvent {
            message: format!("fetching {}", descriptor.url),
            elapsed: None,
        });
        match self.fetch_with_retries(descriptor) {
            Ok((path, size)) => {
                info!(url = %descriptor.url, size, "downloaded");
                if self.options.force {
                    refreshed
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(fingerprint);
                }
                sink.event(ProgressEvent {
                    message: format!("downloaded {} ({size} bytes)", descriptor.filename),
                    elapsed: Some(start.elapsed()),
                });
                DownloadResult::Success {
                    path,
                    size,
                    from_cache: false,
                }
            }
            Err(err) => {
                warn!(url = %descriptor.url, error = %err, "download failed");
                sink.event(ProgressEvent {
                    message: format!("failed {}: {err}", descriptor.filename),
                    elapsed: Some(start.elapsed()),
                });
                DownloadResult::failure(&descriptor.url, &err)
            }
        }
    }

    fn materialize(
        &self,
        descriptor: &DownloadDescriptor,
        entry: &CacheEntry,
    ) -> Result<PathBuf, DatasetError> {
        let target = std::path::absolute(&descriptor.target_path).map_err(fs_err)?;
        if target != entry.local_path {
            debug!(
                from = %entry.local_path.display(),
                to = %target.display(),
                "copying cached artifact"
            );
            copy_file_atomic(&entry.local_path, &target)?;
        }
        Ok(target)
    }

    fn fetch_with_retries(
        &self,
        descriptor: &DownloadDescriptor,
    ) -> Result<(PathBuf, u64), DatasetError> {
        let expected_sha = descriptor
            .expected_sha256()
            .map_err(|reason| DatasetError::Integrity {
                url: descriptor.url.clone(),
                reason,
            })?;
        let policy = self.options.retry;
        let mut attempt = 1;
        let mut integrity_failures = 0;
        loop {
            if self.abort.is_aborted() {
                return Err(DatasetError::Aborted);
            }
            let err = match self.fetch_once(descriptor, expected_sha.as_deref()) {
                Ok((size, sha256)) => {
                    let entry = self
                        .cache
                        .commit(descriptor, &descriptor.target_path, size, &sha256)?;
                    return Ok((entry.local_path, size));
                }
                Err(err) => err,
            };
            let retry = match &err {
                DatasetError::Integrity { .. } => {
                    integrity_failures += 1;
                    integrity_failures <= self.options.integrity_retries
                }
                other => other.is_retryable(),
            };
            if !retry || attempt >= policy.attempts() {
                return Err(err);
            }
            debug!(url = %descriptor.url, attempt, error = %err, "retrying download");
            self.pause(policy.delay(attempt));
            attempt += 1;
        }
    }

    /// One attempt: stream into a temp file beside the target, verify, and
    /// rename into place. Returns the size and SHA-256 of what was written.
    fn fetch_once(
        &self,
        descriptor: &DownloadDescriptor,
        expected_sha: Option<&str>,
    ) -> Result<(u64, String), DatasetError> {
        let url = descriptor.url.as_str();
        let FetchResponse {
            content_length,
            mut body,
            ..
        } = self.fetcher.get(url)?.error_for_status(url)?;

        let target = &descriptor.target_path;
        ensure_parent(target)?;
        let mut temp = Builder::new()
            .prefix(".mtdl-")
            .suffix(".part")
            .tempfile_in(parent_dir(target))
            .map_err(fs_err)?;

        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            if self.abort.is_aborted() {
                return Err(DatasetError::Aborted);
            }
            let read = match body.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(DatasetError::Network {
                        url: url.to_string(),
                        message: err.to_string(),
                        retryable: true,
                    });
                }
            };
            temp.write_all(&buffer[..read]).map_err(fs_err)?;
            hasher.update(&buffer[..read]);
            size += read as u64;
        }
        temp.flush().map_err(fs_err)?;

        if let Some(expected) = descriptor.expected_size {
            if expected != size {
                return Err(DatasetError::Integrity {
                    url: url.to_string(),
                    reason: format!("expected {expected} bytes, received {size}"),
                });
            }
        } else if let Some(announced) = content_length {
            if announced != size {
                return Err(DatasetError::Network {
                    url: url.to_string(),
                    message: format!("body truncated: {size} of {announced} bytes"),
                    retryable: true,
                });
            }
        }

        let actual = hex::encode(hasher.finalize());
        if let Some(expected) = expected_sha {
            if expected != actual {
                return Err(DatasetError::Integrity {
                    url: url.to_string(),
                    reason: format!("sha256 mismatch: expected {expected}, got {actual}"),
                });
            }
        }

        temp.persist(target).map_err(fs_err)?;
        Ok((size, actual))
    }

    fn pause(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.abort.is_aborted() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(ABORT_POLL));
        }
    }
}
