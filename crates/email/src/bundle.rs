use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("no file name in {0}")]
    NoFileName(PathBuf),
    #[error("two artifacts share the name {0}")]
    DuplicateName(String),
}

/// Packs `files` flat into a deflated ZIP at `bundle_path`. Entries are
/// named after the file names, so these must be distinct.
pub fn write_bundle(bundle_path: &Path, files: &[PathBuf]) -> Result<PathBuf, BundleError> {
    let mut names = HashSet::new();
    for file in files {
        let name = entry_name(file)?;
        if !names.insert(name.clone()) {
            return Err(BundleError::DuplicateName(name));
        }
    }

    if let Some(parent) = bundle_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut zip = ZipWriter::new(File::create(bundle_path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for file in files {
        zip.start_file(entry_name(file)?, options)?;
        zip.write_all(&std::fs::read(file)?)?;
    }
    zip.finish()?;

    info!(path = %bundle_path.display(), entries = files.len(), "bundle written");
    Ok(bundle_path.to_path_buf())
}

fn entry_name(path: &Path) -> Result<String, BundleError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| BundleError::NoFileName(path.to_path_buf()))
}
