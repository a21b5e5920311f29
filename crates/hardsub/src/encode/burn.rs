//! Main encode with burned-in subtitles, and text subtitle extraction.

use super::{escape_filter_path, ffmpeg_with_stats, EncodeSettings};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Where the burned-in subtitles come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtitleSource {
    /// Extracted text sidecar rendered with the `subtitles` filter
    Sidecar(PathBuf),
    /// Bitmap subtitle stream of the input composited with `overlay`
    Overlay { track: u32 },
}

/// Parameters for the main encode.
#[derive(Debug, Clone)]
pub struct BurnParams {
    pub input: PathBuf,
    pub output: PathBuf,
    pub video_track: u32,
    pub audio_track: u32,
    pub subtitles: SubtitleSource,
    pub settings: EncodeSettings,
}

/// Build the main encode command.
///
/// Text subtitles: `-map 0:<video> -map 0:<audio> -vf subtitles=<sidecar>`.
/// Bitmap subtitles: `-filter_complex [0:<video>][0:<subs>]overlay[v]
/// -map [v] -map 0:<audio>`.
pub fn build_burn_command(params: &BurnParams) -> Command {
    let mut cmd = ffmpeg_with_stats();
    cmd.arg("-i").arg(&params.input);

    match &params.subtitles {
        SubtitleSource::Sidecar(sidecar) => {
            cmd.arg("-map").arg(format!("0:{}", params.video_track));
            cmd.arg("-map").arg(format!("0:{}", params.audio_track));
            cmd.arg("-vf")
                .arg(format!("subtitles={}", escape_filter_path(sidecar)));
        }
        SubtitleSource::Overlay { track } => {
            cmd.arg("-filter_complex")
                .arg(format!("[0:{}][0:{}]overlay[v]", params.video_track, track));
            cmd.arg("-map").arg("[v]");
            cmd.arg("-map").arg(format!("0:{}", params.audio_track));
        }
    }

    params.settings.push_codec_args(&mut cmd);
    cmd.arg(&params.output);
    cmd
}

/// Extract one subtitle track to a sidecar; the format follows the
/// sidecar's extension.
pub fn build_extract_command(input: &Path, subtitle_track: u32, sidecar: &Path) -> Command {
    let mut cmd = ffmpeg_with_stats();
    cmd.args(["-txt_format", "text"]);
    cmd.arg("-i").arg(input);
    cmd.arg("-map").arg(format!("0:{}", subtitle_track));
    cmd.arg(sidecar);
    cmd
}
