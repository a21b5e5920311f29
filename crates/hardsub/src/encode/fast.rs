//! Sped-up variant: copy the video stream out as Annex-B, then remux it at a
//! higher frame rate with the audio tempo raised to match.

use super::{ffmpeg_with_stats, format_decimal};
use std::path::PathBuf;
use std::process::Command;

/// Frame rate assumed when the source rate is unknown.
pub const FALLBACK_FRAME_RATE: f64 = 24.0;

#[derive(Debug, Clone)]
pub struct FastParams {
    /// Normal-speed output of the main encode
    pub input: PathBuf,
    /// Intermediate raw elementary stream
    pub raw_stream: PathBuf,
    /// Final sped-up file
    pub output: PathBuf,
    pub h265: bool,
    pub source_frame_rate: Option<f64>,
    pub speed: f64,
}

impl FastParams {
    pub fn target_frame_rate(&self) -> f64 {
        self.source_frame_rate.unwrap_or(FALLBACK_FRAME_RATE) * self.speed
    }
}

/// Step 1: `-map 0:v -c:v copy -bsf:v <h264|hevc>_mp4toannexb <raw>`.
pub fn build_annexb_command(params: &FastParams) -> Command {
    let bsf = if params.h265 {
        "hevc_mp4toannexb"
    } else {
        "h264_mp4toannexb"
    };
    let mut cmd = ffmpeg_with_stats();
    cmd.arg("-i").arg(&params.input);
    cmd.args(["-map", "0:v", "-c:v", "copy", "-bsf:v", bsf]);
    cmd.arg(&params.raw_stream);
    cmd
}

/// Step 2: regenerate timestamps at the sped-up rate and take the audio of
/// the normal-speed file through `atempo`.
pub fn build_retime_command(params: &FastParams) -> Command {
    let mut cmd = ffmpeg_with_stats();
    cmd.args(["-fflags", "+genpts"]);
    cmd.arg("-r").arg(format_decimal(params.target_frame_rate()));
    cmd.arg("-i").arg(&params.raw_stream);
    cmd.arg("-i").arg(&params.input);
    cmd.args(["-map", "0:v", "-c:v", "copy", "-map", "1:a", "-c:a", "aac"]);
    cmd.arg("-af").arg(format!("atempo={}", format_decimal(params.speed)));
    cmd.args(["-movflags", "faststart"]);
    cmd.arg(&params.output);
    cmd
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn params(h265: bool, rate: Option<f64>) -> FastParams {
        FastParams {
            input: PathBuf::from("/out/ep.mp4"),
            raw_stream: PathBuf::from("/out/ep.h264"),
            output: PathBuf::from("/out/FAST_ep.mp4"),
            h265,
            source_frame_rate: rate,
            speed: 1.5,
        }
    }

    #[test]
    fn test_annexb_filter_follows_codec() {
        let args = get_command_args(&build_annexb_command(&params(false, None)));
        assert!(has_flag_with_value(&args, "-bsf:v", "h264_mp4toannexb"));
        let args = get_command_args(&build_annexb_command(&params(true, None)));
        assert!(has_flag_with_value(&args, "-bsf:v", "hevc_mp4toannexb"));
    }

    #[test]
    fn test_retime_uses_scaled_rate_and_tempo() {
        let args = get_command_args(&build_retime_command(&params(false, None)));
        assert!(has_flag_with_value(&args, "-r", "36"));
        assert!(has_flag_with_value(&args, "-af", "atempo=1.5"));
        assert!(has_flag_with_value(&args, "-fflags", "+genpts"));
        assert!(has_flag_with_value(&args, "-map", "1:a"));
        assert_eq!(args.last().map(String::as_str), Some("/out/FAST_ep.mp4"));
    }

    #[test]
    fn test_retime_with_known_rate() {
        let args = get_command_args(&build_retime_command(&params(false, Some(23.976))));
        assert!(has_flag_with_value(&args, "-r", "35.964"));
    }
}
