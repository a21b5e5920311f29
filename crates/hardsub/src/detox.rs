//! Filename sanitizing so names survive shell hooks and filter arguments.

use crate::watch::matches_suffix;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn is_kept(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '-' || ch == '.'
}

/// Sanitize the final component of a file name.
///
/// Removes every word in `remove_words`, turns runs of spaces and
/// underscores into a single `_` (never at the start), keeps ASCII letters,
/// digits, `-` and `.`, and drops everything else.
pub fn detox_name(name: &str, remove_words: &[String]) -> String {
    let mut name = name.to_string();
    for word in remove_words.iter().filter(|w| !w.is_empty()) {
        name = name.replace(word.as_str(), "");
    }

    let mut out = String::with_capacity(name.len());
    let mut just_wrote_underscore = true;
    for ch in name.chars() {
        if ch == ' ' || ch == '_' {
            if !just_wrote_underscore {
                out.push('_');
                just_wrote_underscore = true;
            }
        } else if is_kept(ch) {
            out.push(ch);
            just_wrote_underscore = false;
        }
    }
    out
}

/// [`detox_name`] applied to the last component of `path`; the directory
/// part is left alone.
pub fn detox_filename(path: &Path, remove_words: &[String]) -> PathBuf {
    match path.file_name() {
        Some(name) => path.with_file_name(detox_name(&name.to_string_lossy(), remove_words)),
        None => path.to_path_buf(),
    }
}

/// Rename every file in `dir` with the given extension to its detoxed
/// name. Returns how many files were renamed.
///
/// Files whose detoxed name is empty or already taken are left alone, as
/// are files for which `skip` returns true.
pub fn detox_directory(
    dir: &Path,
    extension: &str,
    remove_words: &[String],
    skip: impl Fn(&Path) -> bool,
) -> std::io::Result<usize> {
    let mut renamed = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !matches_suffix(&path, extension) || skip(&path) {
            continue;
        }
        let clean = detox_filename(&path, remove_words);
        if clean == path {
            continue;
        }
        let clean_name_empty = clean
            .file_name()
            .map(|n| n.is_empty())
            .unwrap_or(true);
        if clean_name_empty || clean.exists() {
            warn!(path = %path.display(), target = %clean.display(), "cannot detox file name");
            continue;
        }
        std::fs::rename(&path, &clean)?;
        info!(from = %path.display(), to = %clean.display(), "renamed file");
        renamed += 1;
    }
    Ok(renamed)
}
