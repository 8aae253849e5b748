
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::DownloadDescriptor;
use crate::error::DatasetError;
use crate::fs_util::{file_size, fs_err, write_json_atomic};

const INDEX_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub local_path: PathBuf,
    pub size: u64,
    pub completed_at: DateTime<Utc>,
    pub source_url: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    schema_version: u32,
    entries: BTreeMap<String, CacheEntry>,
}

#[derive(Debug)]
pub struct CacheStore {
    root: Utf8PathBuf,
    index: Mutex<BTreeMap<String, CacheEntry>>,
    inflight: Mutex<HashSet<String>>,
    released: Condvar,
}

impl CacheStore {
    pub fn default_root() -> Result<Utf8PathBuf, DatasetError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir().join(".cache").join("mt-dataset-downloader"),
                )
                .ok()
            })
            .ok_or_else(|| {
                DatasetError::Filesystem("unable to resolve cache directory".to_string())
            })
    }

    pub fn open(root: impl Into<Utf8PathBuf>) -> Result<Self, DatasetError> {
        let root = root.into();
        fs::create_dir_all(root.join("entries").as_std_path()).map_err(fs_err)?;
        let store = Self {
            index: Mutex::new(BTreeMap::new()),
            inflight: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            root,
        };
        let entries = match store.load_index() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "rebuilding cache index from entry records");
                let entries = store.scan_records()?;
                store.persist_index(&entries)?;
                entries
            }
        };
        debug!(root = %store.root, entries = entries.len(), "cache opened");
        *lock(&store.index) = entries;
        Ok(store)
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn index_path(&self) -> Utf8PathBuf {
        self.root.join("index.json")
    }

    fn entries_dir(&self) -> Utf8PathBuf {
        self.root.join("entries")
    }

    fn record_path(&self, fingerprint: &str) -> Utf8PathBuf {
        self.entries_dir().join(format!("{fingerprint}.json"))
    }

    fn load_index(&self) -> Result<BTreeMap<String, CacheEntry>, DatasetError> {
        let recorded = self.record_fingerprints()?;
        let path = self.index_path();
        if !path.as_std_path().exists() {
            if recorded.is_empty() {
                return Ok(BTreeMap::new());
            }
            return Err(DatasetError::CacheCorruption(
                "index missing while entry records exist".to_string(),
            ));
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| DatasetError::CacheCorruption(err.to_string()))?;
        let index: CacheIndex = serde_json::from_str(&content)
            .map_err(|err| DatasetError::CacheCorruption(err.to_string()))?;
        if index.schema_version != INDEX_SCHEMA_VERSION {
            return Err(DatasetError::CacheCorruption(format!(
                "unsupported index schema version {}",
                index.schema_version
            )));
        }
        let indexed: BTreeSet<String> = index.entries.keys().cloned().collect();
        if indexed != recorded {
            return Err(DatasetError::CacheCorruption(format!(
                "index lists {} entries but {} records exist",
                indexed.len(),
                recorded.len()
            )));
        }
        Ok(index.entries)
    }

    fn record_fingerprints(&self) -> Result<BTreeSet<String>, DatasetError> {
        let mut fingerprints = BTreeSet::new();
        for entry in fs::read_dir(self.entries_dir().as_std_path()).map_err(fs_err)? {
            let path = entry.map_err(fs_err)?.path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    fingerprints.insert(stem.to_string());
                }
            }
        }
        Ok(fingerprints)
    }

    /// Reads every record file. Unreadable records are dropped: the artifact
    /// they describe is simply downloaded again.
    fn scan_records(&self) -> Result<BTreeMap<String, CacheEntry>, DatasetError> {
        let mut entries = BTreeMap::new();
        for fingerprint in self.record_fingerprints()? {
            let path = self.record_path(&fingerprint);
            let parsed = fs::read_to_string(path.as_std_path())
                .map_err(|err| err.to_string())
                .and_then(|content| {
                    serde_json::from_str::<CacheEntry>(&content).map_err(|err| err.to_string())
                });
            match parsed {
                Ok(entry) if entry.fingerprint == fingerprint => {
                    entries.insert(fingerprint, entry);
                }
                _ => {
                    warn!(record = %path, "discarding unreadable cache record");
                    let _ = fs::remove_file(path.as_std_path());
                }
            }
        }
        Ok(entries)
    }

    fn persist_index(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<(), DatasetError> {
        let index = IndexRef {
            schema_version: INDEX_SCHEMA_VERSION,
            entries,
        };
        write_json_atomic(self.index_path().as_std_path(), &index)
    }

    /// Returns the entry for `descriptor` if its file is still on disk with
    /// the recorded size. Stale entries are evicted.
    pub fn lookup(&self, descriptor: &DownloadDescriptor) -> Option<CacheEntry> {
        let fingerprint = descriptor.fingerprint();
        let mut index = lock(&self.index);
        let entry = index.get(&fingerprint)?;
        if file_size(&entry.local_path) == Some(entry.size) {
            return Some(entry.clone());
        }
        info!(
            url = %entry.source_url,
            path = %entry.local_path.display(),
            "cached file missing or resized, evicting"
        );
        index.remove(&fingerprint);
        if let Err(err) = self.remove_record(&fingerprint, &index) {
            warn!(error = %err, "failed to evict cache entry");
        }
        None
    }

    pub fn commit(
        &self,
        descriptor: &DownloadDescriptor,
        local_path: &Path,
        size: u64,
        sha256: &str,
    ) -> Result<CacheEntry, DatasetError> {
        let local_path = std::path::absolute(local_path).map_err(fs_err)?;
        let entry = CacheEntry {
            fingerprint: descriptor.fingerprint(),
            local_path,
            size,
            completed_at: Utc::now(),
            source_url: descriptor.url.clone(),
            sha256: sha256.to_string(),
        };
        let mut index = lock(&self.index);
        write_json_atomic(self.record_path(&entry.fingerprint).as_std_path(), &entry)?;
        let previous = index.insert(entry.fingerprint.clone(), entry.clone());
        if let Err(err) = self.persist_index(&index) {
            match previous {
                Some(previous) => index.insert(previous.fingerprint.clone(), previous),
                None => index.remove(&entry.fingerprint),
            };
            return Err(err);
        }
        debug!(url = %entry.source_url, size, "cache entry committed");
        Ok(entry)
    }

    pub fn invalidate(&self, fingerprint: &str) -> Result<bool, DatasetError> {
        let mut index = lock(&self.index);
        if index.remove(fingerprint).is_none() {
            return Ok(false);
        }
        self.remove_record(fingerprint, &index)?;
        Ok(true)
    }

    pub fn clear(&self) -> Result<usize, DatasetError> {
        let mut index = lock(&self.index);
        let removed = index.len();
        index.clear();
        let entries_dir = self.entries_dir();
        if entries_dir.as_std_path().exists() {
            fs::remove_dir_all(entries_dir.as_std_path()).map_err(fs_err)?;
        }
        fs::create_dir_all(entries_dir.as_std_path()).map_err(fs_err)?;
        self.persist_index(&index)?;
        Ok(removed)
    }

    fn remove_record(
        &self,
        fingerprint: &str,
        index: &BTreeMap<String, CacheEntry>,
    ) -> Result<(), DatasetError> {
        let path = self.record_path(fingerprint);
        if path.as_std_path().exists() {
            fs::remove_file(path.as_std_path()).map_err(fs_err)?;
        }
        self.persist_index(index)
    }

    pub fn stats(&self) -> CacheStats {
        let index = lock(&self.index);
        CacheStats {
            entry_count: index.len(),
            total_bytes: index.values().map(|entry| entry.size).sum(),
        }
    }

    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = lock(&self.index).values().cloned().collect();
        entries.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        entries
    }

    /// Blocks until no other caller holds `fingerprint`, then holds it until
    /// the returned guard is dropped.
    pub fn claim(&self, fingerprint: &str) -> FlightGuard<'_> {
        let mut inflight = lock(&self.inflight);
        while inflight.contains(fingerprint) {
            inflight = self
                .released
                .wait(inflight)
                .unwrap_or_else(PoisonError::into_inner);
        }
        inflight.insert(fingerprint.to_string());
        FlightGuard {
            store: self,
            fingerprint: fingerprint.to_string(),
        }
    }
}

#[derive(Serialize)]
struct IndexRef<'a> {
    schema_version: u32,
    entries: &'a BTreeMap<String, CacheEntry>,
}

#[must_use = "the claim is released when the guard is dropped"]
pub struct FlightGuard<'a> {
    store: &'a CacheStore,
    fingerprint: String,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        lock(&self.store.inflight).remove(&self.fingerprint);
        self.store.released.notify_all();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
