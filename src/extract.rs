use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::info;
use zip::ZipArchive;

use crate::error::DatasetError;
use crate::fs_util::parent_dir;

pub trait Extractor: Send + Sync {
    fn extract(&self, archive: &Path) -> Result<Vec<PathBuf>, DatasetError>;
}

/// Extracts `.tar.gz`/`.tgz`, `.tar`, `.gz` and `.zip` next to the archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    TarGz,
    Tar,
    Gz,
    Zip,
}

fn archive_kind(path: &Path) -> Option<ArchiveKind> {
    let name = path.file_name()?.to_str()?.to_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveKind::TarGz)
    } else if name.ends_with(".tar") {
        Some(ArchiveKind::Tar)
    } else if name.ends_with(".gz") {
        Some(ArchiveKind::Gz)
    } else if name.ends_with(".zip") {
        Some(ArchiveKind::Zip)
    } else {
        None
    }
}

impl Extractor for ArchiveExtractor {
    fn extract(&self, archive: &Path) -> Result<Vec<PathBuf>, DatasetError> {
        let error = |reason: String| DatasetError::Extraction {
            path: archive.to_path_buf(),
            reason,
        };
        let kind = archive_kind(archive).ok_or_else(|| error("unsupported archive format".into()))?;
        let target_dir = parent_dir(archive);
        info!(archive = %archive.display(), "extracting");

        let file = File::open(archive).map_err(|err| error(err.to_string()))?;
        let reader = BufReader::new(file);
        let outputs = match kind {
            ArchiveKind::TarGz => unpack_tar(GzDecoder::new(reader), target_dir),
            ArchiveKind::Tar => unpack_tar(reader, target_dir),
            ArchiveKind::Gz => gunzip(reader, archive, target_dir),
            ArchiveKind::Zip => extract_zip(archive, target_dir),
        };
        outputs.map_err(error)
    }
}

fn unpack_tar<R: Read>(reader: R, target_dir: &Path) -> Result<Vec<PathBuf>, String> {
    let mut archive = tar::Archive::new(reader);
    let mut outputs = Vec::new();
    for entry in archive.entries().map_err(|err| err.to_string())? {
        let mut entry = entry.map_err(|err| err.to_string())?;
        let relative = entry.path().map_err(|err| err.to_string())?.into_owned();
        let is_file = entry.header().entry_type().is_file();
        let unpacked = entry
            .unpack_in(target_dir)
            .map_err(|err| err.to_string())?;
        if !unpacked {
            return Err(format!(
                "tar entry path traversal detected: {}",
                relative.display()
            ));
        }
        if is_file {
            outputs.push(target_dir.join(relative));
        }
    }
    Ok(outputs)
}

fn gunzip<R: Read>(reader: R, archive: &Path, target_dir: &Path) -> Result<Vec<PathBuf>, String> {
    let stem = archive
        .file_stem()
        .ok_or_else(|| "archive has no file name".to_string())?;
    let output = target_dir.join(stem);
    let mut decoder = GzDecoder::new(reader);
    let mut file = File::create(&output).map_err(|err| err.to_string())?;
    if let Err(err) = io::copy(&mut decoder, &mut file) {
        drop(file);
        let _ = fs::remove_file(&output);
        return Err(err.to_string());
    }
    Ok(vec![output])
}

fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>, String> {
    let file = File::open(zip_path).map_err(|err| err.to_string())?;
    let mut archive = ZipArchive::new(file).map_err(|err| err.to_string())?;
    let mut outputs = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|err| err.to_string())?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => return Err("zip entry path traversal detected".to_string()),
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path).map_err(|err| err.to_string())?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| err.to_string())?;
        }
        let mut outfile = File::create(&entry_path).map_err(|err| err.to_string())?;
        io::copy(&mut entry, &mut outfile).map_err(|err| err.to_string())?;
        outputs.push(entry_path);
    }
    Ok(outputs)
}
