use crate::domain::{DatasetFamily, DatasetInfo, DatasetSpec, DownloadDescriptor};
use crate::error::DatasetError;
use crate::resolver::UrlResolver;
use crate::resolvers::reject_unknown;

type Category = (&'static str, &'static [&'static str]);

const WMT13: &[Category] = &[
    (
        "training-parallel",
        &[
            "training-parallel-europarl-v7.tgz",
            "training-parallel-commoncrawl.tgz",
            "training-parallel-un.tgz",
            "training-parallel-nc-v8.tgz",
        ],
    ),
    (
        "training-monolingual",
        &[
            "training-monolingual-europarl-v7.tgz",
            "training-monolingual-nc-v8.tgz",
        ],
    ),
    ("dev", &["dev.tgz"]),
    ("test", &["test.tgz"]),
];

const WMT14: &[Category] = &[
    (
        "training-parallel",
        &[
            "training-parallel-europarl-v7.tgz",
            "training-parallel-commoncrawl.tgz",
            "training-parallel-un.tgz",
            "training-parallel-nc-v9.tgz",
            "training-giga-fren.tar",
        ],
    ),
    (
        "training-monolingual",
        &[
            "training-monolingual-europarl-v7.tgz",
            "training-monolingual-nc-v9.tgz",
            "training-monolingual-news-crawl.tgz",
        ],
    ),
    ("dev", &["dev.tgz"]),
    ("test", &["test-full.tgz"]),
];

/// Files land under `{target_dir}/{category}/`. Without `category` every
/// category of the year is returned, in table order.
#[derive(Debug, Clone)]
pub struct WmtResolver {
    year: u16,
    base_url: String,
    categories: &'static [Category],
}

impl WmtResolver {
    pub fn wmt13() -> Self {
        Self::new(13, WMT13)
    }

    pub fn wmt14() -> Self {
        Self::new(14, WMT14)
    }

    fn new(year: u16, categories: &'static [Category]) -> Self {
        Self {
            year,
            base_url: format!("https://www.statmt.org/wmt{year}"),
            categories,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn category_names(&self) -> Vec<String> {
        self.categories
            .iter()
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

impl UrlResolver for WmtResolver {
    fn resolve(&self, spec: &DatasetSpec) -> Result<Vec<DownloadDescriptor>, DatasetError> {
        reject_unknown(spec, &["category"])?;
        let selected: Vec<&Category> = match spec.param("category") {
            Some(wanted) => {
                let category = self
                    .categories
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| {
                        DatasetError::resolution(
                            &spec.dataset_id,
                            format!(
                                "unknown category `{wanted}` for WMT{} (expected one of: {})",
                                self.year,
                                self.category_names().join(", ")
                            ),
                        )
                    })?;
                vec![category]
            }
            None => self.categories.iter().collect(),
        };

        Ok(selected
            .into_iter()
            .flat_map(|(category, files)| {
                files.iter().map(move |file| {
                    spec.descriptor(format!("{}/{file}", self.base_url), *file)
                        .in_subdir(category)
                })
            })
            .collect())
    }

    fn describe(&self, dataset_id: &str) -> DatasetInfo {
        DatasetInfo {
            id: dataset_id.to_string(),
            description: format!("WMT{} shared task data", self.year),
            family: DatasetFamily::YearCategory,
            language_pairs: Vec::new(),
            categories: self.category_names(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn single_category_in_subdir() {
        let spec = DatasetSpec::new("wmt14", "/data").with_param("category", "test");
        let files = WmtResolver::wmt14().resolve(&spec).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].url, "https://www.statmt.org/wmt14/test-full.tgz");
        assert_eq!(files[0].target_path, PathBuf::from("/data/test/test-full.tgz"));
    }

    #[test]
    fn all_categories_in_order() {
        let spec = DatasetSpec::new("wmt13", "/data");
        let files = WmtResolver::wmt13().resolve(&spec).unwrap();
        assert_eq!(files.len(), 8);
        assert_eq!(files[0].filename, "training-parallel-europarl-v7.tgz");
        assert_eq!(files[7].filename, "test.tgz");
    }

    #[test]
    fn unknown_category() {
        let spec = DatasetSpec::new("wmt14", "/data").with_param("category", "blind-test");
        assert_matches!(
            WmtResolver::wmt14().resolve(&spec),
            Err(DatasetError::Resolution { .. })
        );
    }
}
