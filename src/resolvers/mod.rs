
mod europarl;
mod news_commentary;
mod un_corpus;
mod wmt;

pub use europarl::EuroparlResolver;
pub use news_commentary::NewsCommentaryResolver;
pub use un_corpus::UnCorpusResolver;
pub use wmt::WmtResolver;

use crate::domain::DatasetSpec;
use crate::error::DatasetError;

/// Rejects parameters a resolver does not understand, so a typo such as
/// `langauge_pair` is reported instead of silently widening the request.
pub(crate) fn reject_unknown(spec: &DatasetSpec, allowed: &[&str]) -> Result<(), DatasetError> {
    match spec
        .parameters
        .keys()
        .find(|key| !allowed.contains(&key.as_str()))
    {
        Some(key) => Err(DatasetError::resolution(
            &spec.dataset_id,
            format!("unsupported parameter `{key}`"),
        )),
        None => Ok(()),
    }
}
