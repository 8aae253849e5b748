use crate::domain::{DatasetFamily, DatasetInfo, DatasetSpec, DownloadDescriptor, LanguagePair};
use crate::error::DatasetError;
use crate::resolver::UrlResolver;
use crate::resolvers::reject_unknown;

const V7_PAIRS: &[&str] = &[
    "bg-en", "cs-en", "da-en", "de-en", "el-en", "es-en", "et-en", "fi-en", "fr-en", "hu-en",
    "it-en", "lt-en", "lv-en", "nl-en", "pl-en", "pt-en", "ro-en", "sk-en", "sl-en",
    "sv-en",
];

/// Europarl parallel releases: one `{pair}.tgz` per language pair at a fixed
/// URL. `language_pair` is required; `all` selects every pair.
#[derive(Debug, Clone)]
pub struct EuroparlResolver {
    version: &'static str,
    base_url: String,
    pairs: &'static [&'static str],
}

impl EuroparlResolver {
    pub fn v7() -> Self {
        Self {
            version: "v7",
            base_url: "https://www.statmt.org/europarl/v7".to_string(),
            pairs: V7_PAIRS,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn descriptor(&self, spec: &DatasetSpec, pair: &str) -> DownloadDescriptor {
        spec.descriptor(format!("{}/{pair}.tgz", self.base_url), format!("{pair}.tgz"))
    }

    fn supported_pair(&self, pair: &LanguagePair) -> Option<&'static str> {
        let forward = pair.to_string();
        let reverse = pair.reversed().to_string();
        self.pairs
            .iter()
            .copied()
            .find(|known| *known == forward || *known == reverse)
    }
}

impl UrlResolver for EuroparlResolver {
    fn resolve(&self, spec: &DatasetSpec) -> Result<Vec<DownloadDescriptor>, DatasetError> {
        reject_unknown(spec, &["language_pair"])?;
        if spec.require("language_pair")?.eq_ignore_ascii_case("all") {
            return Ok(self
                .pairs
                .iter()
                .map(|pair| self.descriptor(spec, pair))
                .collect());
        }

        let Some(pair) = spec.language_pair()? else {
            return Err(DatasetError::resolution(
                &spec.dataset_id,
                "missing parameter `language_pair`",
            ));
        };
        let known = self.supported_pair(&pair).ok_or_else(|| {
            DatasetError::resolution(
                &spec.dataset_id,
                format!("language pair {pair} is not part of Europarl {}", self.version),
            )
        })?;
        Ok(vec![self.descriptor(spec, known)])
    }

    fn describe(&self, dataset_id: &str) -> DatasetInfo {
        DatasetInfo {
            id: dataset_id.to_string(),
            description: format!("Europarl {} parallel corpus", self.version),
            family: DatasetFamily::FixedUrl,
            language_pairs: self.pairs.iter().map(|pair| pair.to_string()).collect(),
            categories: Vec::new(),
        }
    }
}
