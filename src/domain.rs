use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DatasetError;

pub type Parameters = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub dataset_id: String,
    #[serde(default)]
    pub parameters: Parameters,
    pub target_dir: PathBuf,
    #[serde(default)]
    pub extract: bool,
}

impl DatasetSpec {
    pub fn new(dataset_id: impl Into<String>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            parameters: Parameters::new(),
            target_dir: target_dir.into(),
            extract: false,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_extract(mut self, extract: bool) -> Self {
        self.extract = extract;
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str, DatasetError> {
        self.param(key).ok_or_else(|| {
            DatasetError::resolution(&self.dataset_id, format!("missing parameter `{key}`"))
        })
    }

    pub fn language_pair(&self) -> Result<Option<LanguagePair>, DatasetError> {
        self.param("language_pair")
            .map(|value| {
                value
                    .parse::<LanguagePair>()
                    .map_err(|reason| DatasetError::resolution(&self.dataset_id, reason))
            })
            .transpose()
    }

    pub fn descriptor(
        &self,
        url: impl Into<String>,
        filename: impl Into<String>,
    ) -> DownloadDescriptor {
        let filename = filename.into();
        DownloadDescriptor {
            url: url.into(),
            target_path: self.target_dir.join(&filename),
            filename,
            expected_size: None,
            checksum: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LanguagePair {
    source: String,
    target: String,
}

impl LanguagePair {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn reversed(&self) -> Self {
        Self {
            source: self.target.clone(),
            target: self.source.clone(),
        }
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}

impl FromStr for LanguagePair {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        let (source, target) = normalized
            .split_once('-')
            .ok_or_else(|| format!("invalid language pair `{value}` (expected e.g. de-en)"))?;
        let valid = |code: &str| {
            (2..=3).contains(&code.len()) && code.chars().all(|ch| ch.is_ascii_lowercase())
        };
        if !valid(source) || !valid(target) || source == target {
            return Err(format!("invalid language pair `{value}` (expected e.g. de-en)"));
        }
        Ok(Self {
            source: source.to_string(),
            target: target.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadDescriptor {
    pub url: String,
    pub filename: String,
    pub target_path: PathBuf,
    pub expected_size: Option<u64>,
    pub checksum: Option<String>,
}

impl DownloadDescriptor {
    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn in_subdir(mut self, subdir: &str) -> Self {
        let parent = self
            .target_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        self.target_path = parent.join(subdir).join(&self.filename);
        self
    }

    /// Cache key for this artifact. Depends on the URL and the expected
    /// content only, never on where the file is placed.
    pub fn fingerprint(&self) -> String {
        let checksum = match self.expected_sha256() {
            Ok(digest) => digest.unwrap_or_default(),
            Err(_) => self
                .checksum
                .as_deref()
                .map(normalize_checksum)
                .unwrap_or_default(),
        };
        let size = self
            .expected_size
            .map(|size| size.to_string())
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(self.url.as_bytes());
        hasher.update(b"\n");
        hasher.update(checksum.as_bytes());
        hasher.update(b"\n");
        hasher.update(size.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn expected_sha256(&self) -> Result<Option<String>, String> {
        let Some(raw) = self.checksum.as_deref() else {
            return Ok(None);
        };
        let normalized = normalize_checksum(raw);
        let digest = match normalized.split_once(':') {
            Some(("sha256", digest)) => digest,
            Some((algorithm, _)) => {
                return Err(format!("unsupported checksum algorithm `{algorithm}`"));
            }
            None => normalized.as_str(),
        };
        if digest.len() != 64 || !digest.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(format!("malformed sha256 checksum `{raw}`"));
        }
        Ok(Some(digest.to_string()))
    }

    pub fn is_archive(&self) -> bool {
        is_archive_name(&self.filename)
    }
}

fn normalize_checksum(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn is_archive_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    [".tgz", ".tar.gz", ".tar", ".gz", ".zip"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadResult {
    Success {
        path: PathBuf,
        size: u64,
        from_cache: bool,
    },
    Failure {
        url: String,
        reason: String,
        retryable: bool,
    },
}

impl DownloadResult {
    /// Aborted transfers are reported retryable: nothing is wrong with the
    /// file itself.
    pub fn failure(url: &str, error: &DatasetError) -> Self {
        DownloadResult::Failure {
            url: url.to_string(),
            reason: error.to_string(),
            retryable: error.is_retryable() || matches!(error, DatasetError::Aborted),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DownloadResult::Success { .. })
    }

    pub fn from_cache(&self) -> bool {
        matches!(
            self,
            DownloadResult::Success {
                from_cache: true,
                ..
            }
        )
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            DownloadResult::Success { path, .. } => Some(path),
            DownloadResult::Failure { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub archive: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub dataset_id: String,
    pub files: Vec<DownloadResult>,
    pub extracted_paths: Option<Vec<PathBuf>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extraction_failures: Vec<ExtractionFailure>,
}

impl DatasetManifest {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            files: Vec::new(),
            extracted_paths: None,
            extraction_failures: Vec::new(),
        }
    }

    pub fn success_count(&self) -> usize {
        self.files.iter().filter(|file| file.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.files.len() - self.success_count()
    }

    pub fn is_complete(&self) -> bool {
        self.failure_count() == 0 && self.extraction_failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetFamily {
    FixedUrl,
    ListingPage,
    YearCategory,
}

impl fmt::Display for DatasetFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetFamily::FixedUrl => write!(f, "fixed-url"),
            DatasetFamily::ListingPage => write!(f, "listing-page"),
            DatasetFamily::YearCategory => write!(f, "year-category"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: String,
    pub description: String,
    pub family: DatasetFamily,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub language_pairs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}
