//! Moving converted sources out of the way.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while archiving an original.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The originals directory could not be created.
    #[error("Failed to create originals directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file could not be moved into the originals directory.
    #[error("Failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Move `from` to `to`, copying and deleting when a rename is not possible
/// (e.g. across filesystems).
pub fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    if let Err(e) = fs::remove_file(from) {
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

fn same_dir(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Move `source` into `originals_dir` unless that is the target directory.
///
/// Returns the new location, or `None` when archiving is disabled by the
/// two directories being the same.
pub fn archive_original(
    source: &Path,
    originals_dir: &Path,
    target_dir: &Path,
) -> Result<Option<PathBuf>, ArchiveError> {
    if same_dir(originals_dir, target_dir) {
        return Ok(None);
    }

    fs::create_dir_all(originals_dir).map_err(|source| ArchiveError::CreateDir {
        path: originals_dir.to_path_buf(),
        source,
    })?;

    let Some(name) = source.file_name() else {
        return Ok(None);
    };
    let destination = originals_dir.join(name);
    move_file(source, &destination).map_err(|e| ArchiveError::Move {
        from: source.to_path_buf(),
        to: destination.clone(),
        source: e,
    })?;
    Ok(Some(destination))
}
