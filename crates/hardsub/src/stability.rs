//! Quiescence detection for files that are still being written.
//!
//! A file is considered complete once its size has stayed the same for a
//! number of consecutive polls. There is no upper bound on the wait: a file
//! that keeps growing keeps the caller waiting.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::trace;

/// Consecutive unchanged observations required by default.
pub const DEFAULT_STABLE_OBSERVATIONS: u32 = 3;

/// Error type for quiescence waits.
#[derive(Debug, Error)]
pub enum StabilityError {
    /// The file vanished or could not be stat'ed while polling.
    #[error("failed to stat {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a single size observation concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Size changed since the previous poll; the counter was reset.
    Growing,
    /// Size unchanged; carries the consecutive unchanged count so far.
    Candidate(u32),
    /// The threshold of unchanged observations was reached.
    Stable,
}

/// Per-file quiescence state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuiescenceTracker {
    last_size: u64,
    unchanged: u32,
    threshold: u32,
}

impl QuiescenceTracker {
    /// Start tracking from the size seen when the file was discovered.
    pub fn new(initial_size: u64, threshold: u32) -> Self {
        Self {
            last_size: initial_size,
            unchanged: 0,
            threshold: threshold.max(1),
        }
    }

    /// Feed the next polled size.
    pub fn observe(&mut self, size: u64) -> Observation {
        if size != self.last_size {
            self.last_size = size;
            self.unchanged = 0;
            return Observation::Growing;
        }

        self.unchanged += 1;
        if self.unchanged >= self.threshold {
            Observation::Stable
        } else {
            Observation::Candidate(self.unchanged)
        }
    }

    pub fn last_size(&self) -> u64 {
        self.last_size
    }

    pub fn unchanged(&self) -> u32 {
        self.unchanged
    }
}

async fn file_size(path: &Path) -> Result<u64, StabilityError> {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|source| StabilityError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Poll `path` every `interval` until its size is unchanged for `threshold`
/// consecutive polls. Returns the final size.
///
/// A stat failure ends the wait immediately with an error.
pub async fn wait_for_stable(
    path: &Path,
    interval: Duration,
    threshold: u32,
) -> Result<u64, StabilityError> {
    let mut tracker = QuiescenceTracker::new(file_size(path).await?, threshold);

    loop {
        sleep(interval).await;
        let size = file_size(path).await?;
        let observation = tracker.observe(size);
        trace!(path = %path.display(), size, ?observation, "quiescence poll");
        if observation == Observation::Stable {
            return Ok(size);
        }
    }
}
