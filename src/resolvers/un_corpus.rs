use crate::domain::{DatasetFamily, DatasetInfo, DatasetSpec, DownloadDescriptor};
use crate::error::DatasetError;
use crate::resolver::UrlResolver;
use crate::resolvers::reject_unknown;

const URL: &str = "https://www.statmt.org/wmt13/training-parallel-un-v1.0.tgz";
const FILENAME: &str = "training-parallel-un-v1.0.tgz";

#[derive(Debug, Clone, Copy, Default)]
pub struct UnCorpusResolver;

impl UrlResolver for UnCorpusResolver {
    fn resolve(&self, spec: &DatasetSpec) -> Result<Vec<DownloadDescriptor>, DatasetError> {
        reject_unknown(spec, &[])?;
        Ok(vec![spec.descriptor(URL, FILENAME)])
    }

    fn describe(&self, dataset_id: &str) -> DatasetInfo {
        DatasetInfo {
            id: dataset_id.to_string(),
            description: "United Nations parallel corpus v1.0".to_string(),
            family: DatasetFamily::FixedUrl,
            language_pairs: Vec::new(),
            categories: Vec::new(),
        }
    }
}
