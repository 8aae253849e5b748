use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CacheStore;
use crate::domain::{DatasetSpec, Parameters};
use crate::error::DatasetError;

pub const CACHE_DIR_ENV: &str = "MTDL_CACHE_DIR";
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// A batch file: either `{"datasets": [...]}` or a bare array of entries.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BatchConfig {
    Wrapped { datasets: Vec<BatchEntry> },
    Bare(Vec<BatchEntry>),
}

impl BatchConfig {
    pub fn into_entries(self) -> Vec<BatchEntry> {
        match self {
            BatchConfig::Wrapped { datasets } => datasets,
            BatchConfig::Bare(entries) => entries,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BatchEntry {
    Shorthand(String),
    Detailed(BatchEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BatchEntryObject {
    pub dataset_id: String,
    #[serde(default)]
    pub target_dir: Option<PathBuf>,
    #[serde(default)]
    pub extract: Option<bool>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    /// Any other key is taken as a resolver parameter.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: &Path, output_dir: &Path) -> Result<Vec<DatasetSpec>, DatasetError> {
        let content =
            fs::read_to_string(path).map_err(|_| DatasetError::ConfigRead(path.to_path_buf()))?;
        let config: BatchConfig = serde_json::from_str(&content)
            .map_err(|err| DatasetError::ConfigParse(err.to_string()))?;
        Self::resolve_config(config, output_dir)
    }

    pub fn resolve_config(
        config: BatchConfig,
        output_dir: &Path,
    ) -> Result<Vec<DatasetSpec>, DatasetError> {
        config
            .into_entries()
            .into_iter()
            .map(|entry| match entry {
                BatchEntry::Shorthand(dataset_id) => {
                    let dataset_id = non_empty_id(dataset_id)?;
                    Ok(DatasetSpec::new(&dataset_id, output_dir.join(&dataset_id)))
                }
                BatchEntry::Detailed(obj) => resolve_entry(obj, output_dir),
            })
            .collect()
    }
}

fn non_empty_id(dataset_id: String) -> Result<String, DatasetError> {
    let trimmed = dataset_id.trim();
    if trimmed.is_empty() {
        return Err(DatasetError::ConfigParse(
            "batch entry has an empty dataset_id".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn resolve_entry(obj: BatchEntryObject, output_dir: &Path) -> Result<DatasetSpec, DatasetError> {
    let dataset_id = non_empty_id(obj.dataset_id)?;
    let target_dir = match obj.target_dir {
        Some(dir) => output_dir.join(dir),
        None => output_dir.join(&dataset_id),
    };

    let mut parameters = Parameters::new();
    for (key, value) in obj.parameters.into_iter().chain(obj.extra) {
        let value = parameter_value(&dataset_id, &key, value)?;
        parameters.insert(key, value);
    }

    Ok(DatasetSpec {
        dataset_id,
        parameters,
        target_dir,
        extract: obj.extract.unwrap_or(false),
    })
}

fn parameter_value(dataset_id: &str, key: &str, value: Value) -> Result<String, DatasetError> {
    match value {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        Value::Bool(value) => Ok(value.to_string()),
        other => Err(DatasetError::ConfigParse(format!(
            "{dataset_id}: parameter `{key}` must be a string or number, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub cache_dir: Utf8PathBuf,
    pub max_workers: usize,
}

impl Settings {
    /// Cache directory precedence: explicit flag, then `MTDL_CACHE_DIR`,
    /// then the per-user default.
    pub fn resolve(
        cache_dir: Option<PathBuf>,
        max_workers: Option<usize>,
    ) -> Result<Self, DatasetError> {
        Self::resolve_with_env(cache_dir, env::var_os(CACHE_DIR_ENV), max_workers)
    }

    pub fn resolve_with_env(
        cache_dir: Option<PathBuf>,
        env_cache_dir: Option<OsString>,
        max_workers: Option<usize>,
    ) -> Result<Self, DatasetError> {
        let explicit = cache_dir.or_else(|| {
            env_cache_dir
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        });
        let cache_dir = match explicit {
            Some(path) => Utf8PathBuf::from_path_buf(path).map_err(|path| {
                DatasetError::Filesystem(format!(
                    "cache directory is not valid UTF-8: {}",
                    path.display()
                ))
            })?,
            None => CacheStore::default_root()?,
        };
        let max_workers = max_workers.unwrap_or(DEFAULT_MAX_WORKERS).max(1);
        Ok(Self {
            cache_dir,
            max_workers,
        })
    }
}
