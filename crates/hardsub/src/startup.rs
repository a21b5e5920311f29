//! Startup checks for the external tools the pipeline shells out to.
//!
//! Missing required tools abort startup before any file is touched.
//! Optional tools only disable the features that need them.

use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

/// Tools without which no file can be converted.
pub const REQUIRED_TOOLS: &[&str] = &["mkvmerge", "ffmpeg", "ffprobe"];

/// Tools used by optional stages: font cache refresh and remote copy.
pub const OPTIONAL_TOOLS: &[&str] = &["fc-cache", "scp"];

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("required tool(s) not found in PATH: {}", .0.join(", "))]
    MissingTools(Vec<String>),
}

/// Where each available tool was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolReport {
    pub found: Vec<(String, PathBuf)>,
    pub missing_optional: Vec<String>,
}

impl ToolReport {
    pub fn has(&self, tool: &str) -> bool {
        self.found.iter().any(|(name, _)| name == tool)
    }
}

/// Check the tools with a custom lookup.
pub fn check_tools_with<F>(lookup: F) -> Result<ToolReport, StartupError>
where
    F: Fn(&str) -> Option<PathBuf>,
{
    let mut report = ToolReport::default();
    let mut missing = Vec::new();

    for tool in REQUIRED_TOOLS {
        match lookup(tool) {
            Some(path) => report.found.push((tool.to_string(), path)),
            None => missing.push(tool.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(StartupError::MissingTools(missing));
    }

    for tool in OPTIONAL_TOOLS {
        match lookup(tool) {
            Some(path) => report.found.push((tool.to_string(), path)),
            None => {
                warn!(tool, "optional tool not found, related features will fail");
                report.missing_optional.push(tool.to_string());
            }
        }
    }

    for (name, path) in &report.found {
        debug!(tool = %name, path = %path.display(), "found tool");
    }
    Ok(report)
}

/// Resolve every tool on `PATH`.
pub fn run_startup_checks() -> Result<ToolReport, StartupError> {
    check_tools_with(|tool| which::which(tool).ok())
}
