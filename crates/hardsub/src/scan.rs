//! Scanner module for discovering source files in the source directory.
//!
//! Only the top level of the directory is listed; converted output and
//! archived originals live in subdirectories and must not be picked up again.

use crate::watch::matches_suffix;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A source file discovered during scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCandidate {
    /// Full path to the file.
    pub path: PathBuf,
    /// File size in bytes at discovery time.
    pub size_bytes: u64,
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// List the files directly inside `dir` whose extension matches
/// `extension` (case-insensitive), skipping hidden files, sorted by path.
///
/// A missing directory yields no candidates.
pub fn scan_source_dir(dir: &Path, extension: &str) -> Vec<ScanCandidate> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut candidates: Vec<ScanCandidate> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| !is_hidden(entry.path()) && matches_suffix(entry.path(), extension))
        .filter_map(|entry| {
            let size_bytes = entry.metadata().ok()?.len();
            Some(ScanCandidate {
                path: entry.into_path(),
                size_bytes,
            })
        })
        .collect();

    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_scan_lists_matching_files_sorted() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("b.mkv")).unwrap();
        File::create(dir.path().join("a.MKV")).unwrap();
        File::create(dir.path().join("notes.txt")).unwrap();
        File::create(dir.path().join(".hidden.mkv")).unwrap();

        let found: Vec<PathBuf> = scan_source_dir(dir.path(), "mkv")
            .into_iter()
            .map(|c| c.path)
            .collect();
        assert_eq!(found, vec![dir.path().join("a.MKV"), dir.path().join("b.mkv")]);
    }

    #[test]
    fn test_scan_is_not_recursive() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("converted");
        fs::create_dir(&nested).unwrap();
        File::create(nested.join("HS_ep.mkv")).unwrap();
        File::create(dir.path().join("ep.mkv")).unwrap();

        let found = scan_source_dir(dir.path(), "mkv");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, dir.path().join("ep.mkv"));
    }

    #[test]
    fn test_scan_records_sizes() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ep.mkv"), vec![0u8; 42]).unwrap();
        assert_eq!(scan_source_dir(dir.path(), "mkv")[0].size_bytes, 42);
    }

    #[test]
    fn test_scan_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(scan_source_dir(&dir.path().join("absent"), "mkv").is_empty());
    }

    // Strategy for generating file stems
    fn stem_strategy() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_]{1,20}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        // Extension matching ignores case for any stem.
        #[test]
        fn prop_extension_case_insensitive(
            stem in stem_strategy(),
            ext in prop::sample::select(vec!["mkv", "MKV", "Mkv", "mKv"]),
        ) {
            let dir = TempDir::new().unwrap();
            File::create(dir.path().join(format!("{}.{}", stem, ext))).unwrap();
            File::create(dir.path().join(format!("{}.mp4", stem))).unwrap();
            let found = scan_source_dir(dir.path(), "mkv");
            prop_assert_eq!(found.len(), 1);
        }
    }
}
