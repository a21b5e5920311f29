//! ffmpeg command builders.
//!
//! Builders only assemble `Command`s; running them goes through a
//! [`ProcessRunner`](crate::process::ProcessRunner) so the pipeline can be
//! tested without ffmpeg installed.

pub mod burn;
pub mod cut;
pub mod fast;

pub use burn::{build_burn_command, build_extract_command, BurnParams, SubtitleSource};
pub use cut::{build_concat_command, build_segment_command, concat_list, Segment};
pub use fast::{build_annexb_command, build_retime_command, FastParams};

use hardsub_config::EncodingConfig;
use std::path::Path;
use std::process::Command;

/// Encoder options shared by every re-encoding command.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub crf: u32,
    pub h265: bool,
    /// `None` when the tune flag is disabled
    pub tune: Option<String>,
    pub preset: String,
    /// Matroska with copied audio instead of mp4 with AAC
    pub mkv: bool,
    pub for_old_devices: bool,
}

impl From<&EncodingConfig> for EncodeSettings {
    fn from(cfg: &EncodingConfig) -> Self {
        let tune = match cfg.tune.trim() {
            "" | "none" => None,
            t => Some(t.to_string()),
        };
        Self {
            crf: cfg.crf,
            h265: cfg.h265,
            tune,
            preset: cfg.preset.clone(),
            mkv: cfg.mkv,
            for_old_devices: cfg.for_old_devices,
        }
    }
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self::from(&EncodingConfig::default())
    }
}

impl EncodeSettings {
    pub fn video_codec(&self) -> &'static str {
        if self.h265 {
            "libx265"
        } else {
            "libx264"
        }
    }

    pub fn audio_codec(&self) -> &'static str {
        if self.mkv {
            "copy"
        } else {
            "aac"
        }
    }

    /// Append codec, quality and device-compatibility flags.
    pub fn push_codec_args(&self, cmd: &mut Command) {
        cmd.arg("-c:a").arg(self.audio_codec());
        cmd.arg("-c:v").arg(self.video_codec());
        cmd.arg("-crf").arg(self.crf.to_string());
        cmd.arg("-preset").arg(&self.preset);
        if let Some(tune) = &self.tune {
            cmd.arg("-tune").arg(tune);
        }
        if self.for_old_devices {
            if !self.h265 {
                cmd.args(["-profile:v", "baseline", "-level", "3.0"]);
            }
            cmd.args(["-pix_fmt", "yuv420p", "-ac", "2", "-b:a", "128k"]);
            cmd.args(["-movflags", "faststart"]);
        }
    }
}

/// `ffmpeg -y -hide_banner -loglevel error -stats`, the start of every
/// command whose progress is tracked.
pub(crate) fn ffmpeg_with_stats() -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-hide_banner", "-loglevel", "error", "-stats"]);
    cmd
}

/// Escape a path for use as a filter option value inside a filtergraph.
///
/// Two levels: the filter's own option parser first, then the filtergraph
/// parser, which strips one layer of backslashes before the filter sees it.
pub fn escape_filter_path(path: &Path) -> String {
    let option = escape_with(&path.to_string_lossy(), &['\\', ':', '\'']);
    escape_with(&option, &['\\', '\'', '[', ']', ',', ';'])
}

fn escape_with(raw: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Render a rate or timestamp with at most three decimals and no trailing zeros.
pub fn format_decimal(value: f64) -> String {
    let rendered = format!("{:.3}", value);
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Grab one frame at `timestamp` into a JPEG.
pub fn build_dump_frame_command(input: &Path, timestamp: &str, output: &Path) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-hide_banner", "-loglevel", "error"]);
    cmd.arg("-ss").arg(timestamp);
    cmd.arg("-i").arg(input);
    cmd.args(["-frames:v", "1", "-q:v", "2"]);
    cmd.arg(output);
    cmd
}
