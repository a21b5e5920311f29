//! Video summary via ffprobe.
//!
//! The summary only scales progress bars and picks the fast-variant frame
//! rate, so callers treat a failed probe as an empty summary.

use crate::process::{ProcessError, ProcessRunner};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, warn};

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe could not be run or failed.
    #[error("ffprobe failed: {0}")]
    Ffprobe(#[from] ProcessError),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Frame count, frame rate and duration of the first video stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    /// Number of video packets, `0` when unknown.
    pub frames: u64,
    /// Frames per second, if ffprobe reported a usable rate.
    pub frame_rate: Option<f64>,
    /// Container duration in seconds.
    pub duration_secs: Option<f64>,
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub nb_read_packets: Option<String>,
        pub r_frame_rate: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
    }
}

/// Parse an ffprobe rational such as `24000/1001` or a plain number.
/// Zero denominators and non-positive rates yield `None`.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Parses ffprobe JSON output into a VideoSummary.
pub fn parse_summary(json_str: &str) -> Result<VideoSummary, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput = serde_json::from_str(json_str)?;

    let stream = ffprobe.streams.unwrap_or_default().into_iter().next();
    let frames = stream
        .as_ref()
        .and_then(|s| s.nb_read_packets.as_deref())
        .and_then(|n| n.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let frame_rate = stream
        .as_ref()
        .and_then(|s| s.r_frame_rate.as_deref())
        .and_then(parse_frame_rate);
    let duration_secs = ffprobe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok());

    Ok(VideoSummary {
        frames,
        frame_rate,
        duration_secs,
    })
}

/// Count the packets of the first video stream and read its rate and duration.
///
/// Runs `ffprobe -v error -select_streams v:0 -count_packets -show_entries
/// stream=nb_read_packets,r_frame_rate:format=duration -of json <path>`.
pub fn probe_summary(runner: &dyn ProcessRunner, path: &Path) -> Result<VideoSummary, ProbeError> {
    let mut cmd = Command::new("ffprobe");
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-count_packets",
        "-show_entries",
        "stream=nb_read_packets,r_frame_rate:format=duration",
        "-of",
        "json",
    ])
    .arg(path);

    let stdout = runner.capture(&mut cmd)?;
    parse_summary(&String::from_utf8_lossy(&stdout))
}

/// Like [`probe_summary`] but degrades to an empty summary on failure.
pub fn summary_or_default(runner: &dyn ProcessRunner, path: &Path) -> VideoSummary {
    match probe_summary(runner, path) {
        Ok(summary) => {
            debug!(path = %path.display(), frames = summary.frames, "video summary");
            summary
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not probe video summary");
            VideoSummary::default()
        }
    }
}
