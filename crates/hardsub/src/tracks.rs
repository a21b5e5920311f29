//! Track selection from `mkvmerge -J` output.
//!
//! Picks one video, one audio and one subtitle track per file and classifies
//! the subtitle's encoding so the pipeline knows whether to extract a text
//! sidecar or overlay a bitmap stream.

use crate::process::{ProcessError, ProcessRunner};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, warn};

/// Track names containing this word (any case) are song/karaoke subtitles.
const SONGS_MARKER: &str = "songs";

/// Codec ids of SubStationAlpha and its variants.
const ADVANCED_TEXT_CODECS: &[&str] = &["S_TEXT/ASS", "S_TEXT/SSA", "SAA/ASS"];

/// Codec ids of plain UTF-8 text subtitles.
const SRT_TEXT_CODECS: &[&str] = &["S_TEXT/UTF8"];

/// Codec ids of bitmap based subtitles.
const PICTURE_CODECS: &[&str] = &["S_HDMV/PGS", "S_IMAGE/BMP", "S_DVDSUB", "S_VOBSUB"];

/// Error type for track selection.
#[derive(Debug, Error)]
pub enum TrackError {
    /// mkvmerge could not be run or failed.
    #[error("mkvmerge failed: {0}")]
    Probe(#[from] ProcessError),

    /// The identification JSON could not be decoded.
    #[error("Failed to parse mkvmerge output: {0}")]
    Parse(#[from] serde_json::Error),

    /// The report lists no tracks at all.
    #[error("mkvmerge reported no tracks{0}")]
    Empty(String),

    /// The container has no video stream to transcode.
    #[error("no video track found")]
    NoVideoTrack,
}

/// How the selected subtitle track is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubtitleKind {
    /// Plain UTF-8 text (SubRip).
    #[default]
    TextSrt,
    /// SubStationAlpha / Advanced SubStation.
    TextAdvanced,
    /// Bitmap subtitles (PGS, VobSub, DVD).
    Picture,
}

impl SubtitleKind {
    /// Classify a matroska codec id. Unknown ids yield `None`.
    pub fn from_codec_id(codec_id: &str) -> Option<Self> {
        if ADVANCED_TEXT_CODECS.contains(&codec_id) {
            Some(SubtitleKind::TextAdvanced)
        } else if SRT_TEXT_CODECS.contains(&codec_id) {
            Some(SubtitleKind::TextSrt)
        } else if PICTURE_CODECS.contains(&codec_id) {
            Some(SubtitleKind::Picture)
        } else {
            None
        }
    }

    /// Extension of the extracted sidecar file; bitmap subtitles have none.
    pub fn sidecar_extension(&self) -> Option<&'static str> {
        match self {
            SubtitleKind::TextSrt => Some("srt"),
            SubtitleKind::TextAdvanced => Some("ass"),
            SubtitleKind::Picture => None,
        }
    }
}

impl std::fmt::Display for SubtitleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubtitleKind::TextSrt => write!(f, "srt"),
            SubtitleKind::TextAdvanced => write!(f, "ass"),
            SubtitleKind::Picture => write!(f, "picture"),
        }
    }
}

/// The tracks chosen for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSelection {
    pub video: u32,
    pub audio: Option<u32>,
    pub subtitles: Option<u32>,
    pub subtitle_kind: SubtitleKind,
}

/// Inputs steering the selection heuristics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackPreferences {
    /// IETF tag prefix the audio track must carry
    pub audio_lang: String,
    /// IETF tag prefix the subtitle track must carry
    pub subs_lang: String,
    /// Audio track id that bypasses the heuristics
    pub forced_audio: Option<u32>,
    /// Subtitle track id that bypasses the heuristics
    pub forced_subs: Option<u32>,
}

/// Typed view of the parts of `mkvmerge -J` this crate reads.
mod mkvmerge_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct Identification {
        #[serde(default)]
        pub tracks: Vec<Track>,
        #[serde(default)]
        pub errors: Vec<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Track {
        pub id: u32,
        #[serde(rename = "type")]
        pub kind: String,
        #[serde(default)]
        pub codec: String,
        #[serde(default)]
        pub properties: Properties,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct Properties {
        pub codec_id: Option<String>,
        pub language: Option<String>,
        pub language_ietf: Option<String>,
        pub track_name: Option<String>,
    }

    impl Properties {
        /// IETF tag when present, legacy ISO 639-2 code otherwise
        pub fn language_tag(&self) -> &str {
            self.language_ietf
                .as_deref()
                .or(self.language.as_deref())
                .unwrap_or("")
        }
    }
}

/// All audio and subtitle track ids seen, for the single-candidate rule.
#[derive(Debug, Default)]
struct CandidateTracks {
    audio: Vec<u32>,
    subtitles: Vec<u32>,
}

impl CandidateTracks {
    fn only_audio(&self) -> Option<u32> {
        match self.audio.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    fn only_subtitles(&self) -> Option<u32> {
        match self.subtitles.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }
}

fn is_song_track(track_name: Option<&str>) -> bool {
    track_name
        .map(|name| name.to_lowercase().contains(SONGS_MARKER))
        .unwrap_or(false)
}

/// Pick the tracks to use from raw `mkvmerge -J` output.
///
/// - video: the first video track; none is an error
/// - audio: the first track whose language starts with `audio_lang`, else the
///   only audio track, else unset
/// - subtitles: the first track whose language starts with `subs_lang` and
///   whose name does not mention songs, else the only subtitle track, else unset
/// - forced ids replace whatever the heuristics chose
pub fn select_tracks(raw: &[u8], prefs: &TrackPreferences) -> Result<TrackSelection, TrackError> {
    let report: mkvmerge_json::Identification = serde_json::from_slice(raw)?;

    if report.tracks.is_empty() {
        let detail = if report.errors.is_empty() {
            String::new()
        } else {
            format!(": {}", report.errors.join("; "))
        };
        return Err(TrackError::Empty(detail));
    }

    let mut video = None;
    let mut audio = None;
    let mut subtitles = None;
    let mut candidates = CandidateTracks::default();

    for track in &report.tracks {
        let lang = track.properties.language_tag();
        debug!(
            id = track.id,
            kind = %track.kind,
            codec = %track.codec,
            language = %lang,
            "mkvmerge track"
        );

        match track.kind.as_str() {
            "video" => {
                if video.is_none() {
                    video = Some(track.id);
                }
            }
            "audio" => {
                candidates.audio.push(track.id);
                if audio.is_none() && lang.starts_with(prefs.audio_lang.as_str()) {
                    audio = Some(track.id);
                }
            }
            "subtitles" => {
                candidates.subtitles.push(track.id);
                if subtitles.is_none()
                    && lang.starts_with(prefs.subs_lang.as_str())
                    && !is_song_track(track.properties.track_name.as_deref())
                {
                    subtitles = Some(track.id);
                }
            }
            _ => {}
        }
    }

    let video = video.ok_or(TrackError::NoVideoTrack)?;
    let audio = prefs
        .forced_audio
        .or(audio)
        .or_else(|| candidates.only_audio());
    let subtitles = prefs
        .forced_subs
        .or(subtitles)
        .or_else(|| candidates.only_subtitles());

    let subtitle_kind = subtitles
        .and_then(|id| report.tracks.iter().find(|t| t.id == id))
        .map(|track| {
            let codec_id = track.properties.codec_id.as_deref().unwrap_or("");
            SubtitleKind::from_codec_id(codec_id).unwrap_or_else(|| {
                warn!(
                    id = track.id,
                    codec_id = %codec_id,
                    "unrecognized subtitle codec, treating it as srt"
                );
                SubtitleKind::default()
            })
        })
        .unwrap_or_default();

    Ok(TrackSelection {
        video,
        audio,
        subtitles,
        subtitle_kind,
    })
}

/// Run `mkvmerge -J` on `path` and select its tracks.
pub fn probe_tracks(
    runner: &dyn ProcessRunner,
    path: &Path,
    prefs: &TrackPreferences,
) -> Result<TrackSelection, TrackError> {
    let mut cmd = Command::new("mkvmerge");
    cmd.arg("-J").arg(path);
    let raw = runner.capture(&mut cmd)?;
    let selection = select_tracks(&raw, prefs)?;
    debug!(path = %path.display(), ?selection, "tracks selected");
    Ok(selection)
}
