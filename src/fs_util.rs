use std::fs;
use std::path::Path;

use serde::Serialize;
use tempfile::Builder;

use crate::error::DatasetError;

pub(crate) fn fs_err(err: impl ToString) -> DatasetError {
    DatasetError::Filesystem(err.to_string())
}

pub fn ensure_parent(path: &Path) -> Result<(), DatasetError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(fs_err)?;
    }
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), DatasetError> {
    let content = serde_json::to_vec_pretty(value).map_err(fs_err)?;
    write_bytes_atomic(path, &content)
}

pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), DatasetError> {
    ensure_parent(path)?;
    let parent = parent_dir(path);
    let temp = Builder::new()
        .prefix(".mtdl-write")
        .tempfile_in(parent)
        .map_err(fs_err)?;
    fs::write(temp.path(), content).map_err(fs_err)?;
    temp.persist(path).map_err(fs_err)?;
    Ok(())
}

pub fn copy_file_atomic(source: &Path, dest: &Path) -> Result<(), DatasetError> {
    ensure_parent(dest)?;
    let temp = Builder::new()
        .prefix(".mtdl-copy")
        .tempfile_in(parent_dir(dest))
        .map_err(fs_err)?;
    fs::copy(source, temp.path()).map_err(fs_err)?;
    temp.persist(dest).map_err(fs_err)?;
    Ok(())
}

pub fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

pub fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}
