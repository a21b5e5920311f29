//! Intro removal by reference-frame matching.
//!
//! Each boundary frame is located by blending it against the video with
//! `blend=difference` and watching `blackframe` report a near-black result.
//! The interval between the two matches is then cut out.

use crate::encode::{build_concat_command, build_segment_command, concat_list, EncodeSettings, Segment};
use crate::probe::VideoSummary;
use crate::process::{ProcessError, ProcessRunner};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

/// Blend the reference frame against every video frame and report frames
/// that are at least 99% black.
const FRAME_SEARCH_FILTER: &str = "blend=difference:shortest=1,blackframe=99:32";

#[derive(Debug, Error)]
pub enum IntroError {
    #[error("frame search failed: {0}")]
    Search(#[source] ProcessError),

    #[error("reference frame {0} not found in video")]
    FrameNotFound(PathBuf),

    #[error("intro end ({end}s) is not after its start ({begin}s)")]
    InvalidInterval { begin: f64, end: f64 },

    #[error("cut failed: {0}")]
    Cut(#[source] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// `ffmpeg -i <video> -loop 1 -i <frame> -an -filter_complex ... -f null -`
///
/// Runs at the default log level so blackframe's reports reach stderr.
pub fn build_frame_search_command(video: &Path, frame: &Path) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner");
    cmd.arg("-i").arg(video);
    cmd.args(["-loop", "1"]);
    cmd.arg("-i").arg(frame);
    cmd.arg("-an");
    cmd.args(["-filter_complex", FRAME_SEARCH_FILTER]);
    cmd.args(["-f", "null", "-"]);
    cmd
}

/// Extract the `t:<seconds>` field from a blackframe report line.
pub fn parse_blackframe_time(line: &str) -> Option<f64> {
    if !line.contains("pblack") {
        return None;
    }
    line.split_whitespace()
        .find_map(|word| word.strip_prefix("t:"))
        .and_then(|secs| secs.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
}

/// Timestamp of the first frame of `video` matching `frame`.
///
/// The search process is killed as soon as a match is read.
pub fn find_frame_time(
    runner: &dyn ProcessRunner,
    video: &Path,
    frame: &Path,
) -> Result<f64, IntroError> {
    let mut cmd = build_frame_search_command(video, frame);
    let mut is_match = |line: &str| parse_blackframe_time(line).is_some();
    let line = runner
        .first_matching_line(&mut cmd, &mut is_match)
        .map_err(IntroError::Search)?;

    let secs = line
        .as_deref()
        .and_then(parse_blackframe_time)
        .ok_or_else(|| IntroError::FrameNotFound(frame.to_path_buf()))?;
    debug!(frame = %frame.display(), secs, "reference frame located");
    Ok(secs)
}

/// Parse a cut position given as seconds (`90.5`) or `[HH:]MM:SS[.fff]`.
pub fn parse_timestamp(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut total = 0.0;
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() > 3 {
        return None;
    }
    for part in &parts {
        let value: f64 = part.parse().ok()?;
        if value < 0.0 {
            return None;
        }
        total = total * 60.0 + value;
    }
    Some(total)
}

/// `<dir>/<prefix><file name>`
pub fn prefixed_path(path: &Path, prefix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}", prefix, name))
}

fn frames_for(secs: f64, summary: &VideoSummary) -> u64 {
    summary
        .frame_rate
        .map(|rate| (secs * rate).round() as u64)
        .unwrap_or(0)
}

struct CutFiles<'a> {
    part1: &'a Path,
    part2: &'a Path,
    list: &'a Path,
    output: &'a Path,
}

fn run_cut(
    runner: &dyn ProcessRunner,
    input: &Path,
    begin: f64,
    end: f64,
    settings: &EncodeSettings,
    summary: &VideoSummary,
    files: &CutFiles<'_>,
) -> Result<PathBuf, IntroError> {
    info!(input = %input.display(), begin, end, "cutting interval");

    let mut cmd = build_segment_command(input, files.part1, Segment::Until(begin), settings);
    runner
        .run_with_progress(&mut cmd, frames_for(begin, summary), "cut (1/2)")
        .map_err(IntroError::Cut)?;

    let remaining = summary
        .duration_secs
        .map(|d| (d - end).max(0.0))
        .unwrap_or(0.0);
    let mut cmd = build_segment_command(input, files.part2, Segment::From(end), settings);
    runner
        .run_with_progress(&mut cmd, frames_for(remaining, summary), "cut (2/2)")
        .map_err(IntroError::Cut)?;

    std::fs::write(files.list, concat_list(&[files.part1, files.part2]))?;
    let mut cmd = build_concat_command(files.list, files.output);
    runner.capture(&mut cmd).map_err(IntroError::Cut)?;
    Ok(files.output.to_path_buf())
}

/// Remove `[begin, end)` from `input`, writing `CUT_<name>` next to it.
///
/// Intermediate parts and the concat list are removed whether the cut
/// succeeds or not.
pub fn cut_interval(
    runner: &dyn ProcessRunner,
    input: &Path,
    begin: f64,
    end: f64,
    settings: &EncodeSettings,
    summary: &VideoSummary,
) -> Result<PathBuf, IntroError> {
    if end <= begin {
        return Err(IntroError::InvalidInterval { begin, end });
    }

    let part1 = prefixed_path(input, "PART1_");
    let part2 = prefixed_path(input, "PART2_");
    let list = prefixed_path(input, "CONCAT_").with_extension("txt");
    let output = prefixed_path(input, "CUT_");

    let result = run_cut(runner, input, begin, end, settings, summary, &CutFiles {
        part1: &part1,
        part2: &part2,
        list: &list,
        output: &output,
    });

    for temp in [&part1, &part2, &list] {
        let _ = std::fs::remove_file(temp);
    }
    if result.is_err() {
        let _ = std::fs::remove_file(&output);
    }
    result
}

/// Locate both reference frames in `video` and cut what lies between them.
pub fn cut_intro(
    runner: &dyn ProcessRunner,
    video: &Path,
    begin_frame: &Path,
    end_frame: &Path,
    settings: &EncodeSettings,
    summary: &VideoSummary,
) -> Result<PathBuf, IntroError> {
    let begin = find_frame_time(runner, video, begin_frame)?;
    let end = find_frame_time(runner, video, end_frame)?;
    cut_interval(runner, video, begin, end, settings, summary)
}
