//! Install fonts attached to a matroska file so the subtitle renderer finds them.

use crate::process::{ProcessError, ProcessRunner};
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info, warn};

const FONT_EXTENSIONS: &[&str] = &["ttf", "otf"];

#[derive(Debug, Error)]
pub enum FontError {
    #[error("attachment extraction failed: {0}")]
    Extract(#[from] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn is_font_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| FONT_EXTENSIONS.contains(&e.as_str()))
}

/// Dump every attachment of `input` into `work_dir`, read the input for
/// zero seconds and discard the output.
pub fn build_dump_attachments_command(input: &Path, work_dir: &Path) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-hide_banner", "-loglevel", "error"]);
    cmd.args(["-dump_attachment:t", ""]);
    cmd.arg("-i").arg(input);
    cmd.args(["-t", "0", "-f", "null", "-"]);
    cmd.current_dir(work_dir);
    cmd
}

/// Extract attached fonts into `work_dir`, copy them to `fonts_dir` and
/// refresh the font cache. Returns how many fonts were installed.
///
/// `work_dir` is removed afterwards.
pub fn install_attached_fonts(
    runner: &dyn ProcessRunner,
    input: &Path,
    work_dir: &Path,
    fonts_dir: &Path,
) -> Result<usize, FontError> {
    std::fs::create_dir_all(work_dir)?;
    let installed = copy_fonts(runner, input, work_dir, fonts_dir);
    if let Err(e) = std::fs::remove_dir_all(work_dir) {
        debug!(dir = %work_dir.display(), error = %e, "could not remove attachment dir");
    }
    let installed = installed?;

    if installed > 0 {
        let mut cmd = Command::new("fc-cache");
        cmd.arg("-f");
        if let Err(e) = runner.capture(&mut cmd) {
            warn!(error = %e, "fc-cache failed, new fonts may not be visible yet");
        }
        info!(count = installed, dir = %fonts_dir.display(), "installed attached fonts");
    }
    Ok(installed)
}

fn copy_fonts(
    runner: &dyn ProcessRunner,
    input: &Path,
    work_dir: &Path,
    fonts_dir: &Path,
) -> Result<usize, FontError> {
    let mut cmd = build_dump_attachments_command(input, work_dir);
    runner.capture(&mut cmd)?;

    let mut installed = 0;
    for entry in std::fs::read_dir(work_dir)? {
        let path = entry?.path();
        if !path.is_file() || !is_font_file(&path) {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        if installed == 0 {
            std::fs::create_dir_all(fonts_dir)?;
        }
        std::fs::copy(&path, fonts_dir.join(name))?;
        debug!(font = %name.to_string_lossy(), "font installed");
        installed += 1;
    }
    Ok(installed)
}
