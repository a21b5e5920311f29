//! Per-file conversion pipeline.
//!
//! Stages run strictly in order:
//! 1. track selection (fatal)
//! 2. subtitle extraction for text subtitles (fatal), hook and SRT fix (degraded)
//! 3. font install (degraded) and main encode (fatal)
//! 4. fast variant (degraded)
//! 5. intro cut (degraded, skipped without a matching entry)
//! 6. post command (degraded)
//! 7. archive of the source (degraded)
//!
//! The pipeline is synchronous; async callers run it on `spawn_blocking`.

use crate::archive::{archive_original, ArchiveError};
use crate::encode::{
    build_annexb_command, build_burn_command, build_dump_frame_command, build_extract_command,
    build_retime_command, BurnParams, EncodeSettings, FastParams, SubtitleSource,
};
use crate::fonts::install_attached_fonts;
use crate::intro::{cut_interval, cut_intro, prefixed_path, IntroError};
use crate::probe::{summary_or_default, VideoSummary};
use crate::process::{ProcessError, ProcessRunner};
use crate::subfix::fix_subtitle_file;
use crate::tracks::{probe_tracks, SubtitleKind, TrackError, TrackPreferences, TrackSelection};
use hardsub_config::Config;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Placeholder for the final output path in `[hooks].post_cmd`.
pub const OUTPUT_PLACEHOLDER: &str = "%o";
/// Placeholder for the sidecar path in `[subtitles].post_extract_cmd`.
pub const SUBTITLE_PLACEHOLDER: &str = "%s";

/// Prefix of matroska outputs, which would otherwise share the source name.
const MKV_OUTPUT_PREFIX: &str = "HS_";
const FAST_PREFIX: &str = "FAST_";

/// Errors that end the conversion of one file.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("track selection failed: {0}")]
    TrackSelection(#[from] TrackError),

    #[error("no audio track selected in {0}")]
    NoAudioTrack(PathBuf),

    #[error("no subtitle track selected in {0}")]
    NoSubtitleTrack(PathBuf),

    #[error("subtitle extraction failed: {0}")]
    SubtitleExtraction(#[source] ProcessError),

    #[error("encode failed: {0}")]
    Encode(#[source] ProcessError),

    #[error("cut failed: {0}")]
    Cut(#[from] IntroError),

    #[error("frame dump failed: {0}")]
    FrameDump(#[source] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pipeline stage, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Selecting,
    ExtractingSubtitles,
    Encoding,
    FastVariant,
    IntroCut,
    PostCommand,
    Archiving,
    Completed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Selecting => "selecting",
            Stage::ExtractingSubtitles => "extracting_subtitles",
            Stage::Encoding => "encoding",
            Stage::FastVariant => "fast_variant",
            Stage::IntroCut => "intro_cut",
            Stage::PostCommand => "post_command",
            Stage::Archiving => "archiving",
            Stage::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// State of one file's conversion.
#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub sidecar: Option<PathBuf>,
    pub selection: TrackSelection,
    pub summary: VideoSummary,
    pub stage: Stage,
}

impl PipelineJob {
    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        debug!(input = %self.input.display(), stage = %stage, "pipeline stage");
    }
}

/// Deletes the extracted sidecar when dropped, unless it is to be kept.
struct SidecarCleanup {
    path: PathBuf,
    keep: bool,
}

impl Drop for SidecarCleanup {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "could not remove subtitle sidecar");
            }
        }
    }
}

/// Where the main encode writes for `input`.
///
/// Matroska: `<target>/HS_<name>`. mp4: `<target>/<stem>.mp4`.
pub fn output_path_for(input: &Path, target_dir: &Path, mkv: bool) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if mkv {
        target_dir.join(format!("{}{}", MKV_OUTPUT_PREFIX, name))
    } else {
        target_dir.join(&name).with_extension("mp4")
    }
}

/// Substitute `placeholder` in a hook command.
pub fn expand_hook(template: &str, placeholder: &str, path: &Path) -> String {
    template.replace(placeholder, &path.to_string_lossy())
}

/// `<dir>/<stem>_<timestamp>.jpg`
pub fn frame_dump_path(input: &Path, timestamp: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{}_{}.jpg", stem, timestamp))
}

/// Runs the conversion stages for one file at a time.
pub struct ConversionPipeline {
    config: Config,
    prefs: TrackPreferences,
    settings: EncodeSettings,
    runner: Arc<dyn ProcessRunner>,
}

impl ConversionPipeline {
    pub fn new(config: Config, runner: Arc<dyn ProcessRunner>) -> Self {
        let prefs = TrackPreferences {
            audio_lang: config.languages.audio.clone(),
            subs_lang: config.languages.subtitles.clone(),
            forced_audio: None,
            forced_subs: None,
        };
        let settings = EncodeSettings::from(&config.encoding);
        Self {
            config,
            prefs,
            settings,
            runner,
        }
    }

    /// Bypass the selection heuristics for these track ids.
    pub fn with_forced_tracks(mut self, audio: Option<u32>, subtitles: Option<u32>) -> Self {
        self.prefs.forced_audio = audio;
        self.prefs.forced_subs = subtitles;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.runner)
    }

    /// Convert `input` and return the path of the final artifact.
    pub fn convert_file(&self, input: &Path) -> Result<PathBuf, PipelineError> {
        let runner = self.runner.as_ref();
        info!(input = %input.display(), "converting");

        let selection = probe_tracks(runner, input, &self.prefs)?;
        let audio_track = selection
            .audio
            .ok_or_else(|| PipelineError::NoAudioTrack(input.to_path_buf()))?;
        let subtitle_track = selection
            .subtitles
            .ok_or_else(|| PipelineError::NoSubtitleTrack(input.to_path_buf()))?;
        info!(
            video = selection.video,
            audio = audio_track,
            subtitles = subtitle_track,
            kind = %selection.subtitle_kind,
            "tracks selected"
        );

        let target_dir = self.config.target_dir();
        std::fs::create_dir_all(&target_dir)?;

        let mut job = PipelineJob {
            input: input.to_path_buf(),
            output: output_path_for(input, &target_dir, self.settings.mkv),
            sidecar: None,
            selection,
            summary: summary_or_default(runner, input),
            stage: Stage::Selecting,
        };

        // The cleanup guard lives until the end of this function so the
        // sidecar is removed on every exit path.
        let (subtitles, _sidecar_cleanup) = match selection.subtitle_kind.sidecar_extension() {
            None => (
                SubtitleSource::Overlay {
                    track: subtitle_track,
                },
                None,
            ),
            Some(ext) => {
                job.enter(Stage::ExtractingSubtitles);
                let sidecar = input.with_extension(ext);
                let cleanup = SidecarCleanup {
                    path: sidecar.clone(),
                    keep: self.config.subtitles.keep,
                };
                self.extract_subtitles(&job, subtitle_track, &sidecar)?;
                job.sidecar = Some(sidecar.clone());
                (SubtitleSource::Sidecar(sidecar), Some(cleanup))
            }
        };

        job.enter(Stage::Encoding);
        if self.config.subtitles.extract_fonts {
            self.install_fonts(input, &target_dir);
        }
        let params = BurnParams {
            input: input.to_path_buf(),
            output: job.output.clone(),
            video_track: selection.video,
            audio_track,
            subtitles,
            settings: self.settings.clone(),
        };
        let mut cmd = build_burn_command(&params);
        if let Err(e) = runner.run_with_progress(&mut cmd, job.summary.frames, "encoding") {
            remove_quietly(&job.output);
            return Err(PipelineError::Encode(e));
        }
        info!(output = %job.output.display(), "encode finished");

        if self.config.fast.enabled {
            job.enter(Stage::FastVariant);
            self.fast_variant(&mut job);
        }

        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(entry) = self.config.intro_for_filename(&file_name) {
            job.enter(Stage::IntroCut);
            match cut_intro(runner, &job.output, &entry.begin, &entry.end, &self.settings, &job.summary) {
                Ok(cut) => {
                    if !entry.keep_uncut {
                        remove_quietly(&job.output);
                    }
                    info!(output = %cut.display(), "intro removed");
                    job.output = cut;
                }
                Err(e) => warn!(output = %job.output.display(), error = %e, "intro cut failed, keeping uncut file"),
            }
        }

        if let Some(template) = &self.config.hooks.post_cmd {
            job.enter(Stage::PostCommand);
            let script = expand_hook(template, OUTPUT_PLACEHOLDER, &job.output);
            if let Err(e) = runner.run_shell(&script) {
                warn!(error = %e, "post command failed");
            }
        }

        job.enter(Stage::Archiving);
        match archive_original(input, &self.config.originals_dir(), &target_dir) {
            Ok(Some(moved)) => debug!(to = %moved.display(), "original archived"),
            Ok(None) => {}
            Err(ArchiveError::CreateDir { path, source }) => {
                debug!(dir = %path.display(), error = %source, "originals directory unavailable, not archiving")
            }
            Err(e) => warn!(error = %e, "could not archive original"),
        }

        job.enter(Stage::Completed);
        info!(input = %input.display(), output = %job.output.display(), "conversion finished");
        Ok(job.output)
    }

    fn extract_subtitles(
        &self,
        job: &PipelineJob,
        subtitle_track: u32,
        sidecar: &Path,
    ) -> Result<(), PipelineError> {
        let runner = self.runner.as_ref();
        let mut cmd = build_extract_command(&job.input, subtitle_track, sidecar);
        runner
            .run_with_progress(&mut cmd, job.summary.frames, "extracting subtitles")
            .map_err(PipelineError::SubtitleExtraction)?;

        if let Some(template) = &self.config.subtitles.post_extract_cmd {
            let script = expand_hook(template, SUBTITLE_PLACEHOLDER, sidecar);
            if let Err(e) = runner.run_shell(&script) {
                warn!(error = %e, "post subtitle extract command failed");
            }
        }

        if job.selection.subtitle_kind == SubtitleKind::TextSrt && self.config.subtitles.normalize_srt {
            match fix_subtitle_file(sidecar, self.config.subtitles.font_size, true) {
                Ok(true) => debug!(path = %sidecar.display(), "subtitle font sizes normalized"),
                Ok(false) => {}
                Err(e) => warn!(path = %sidecar.display(), error = %e, "could not normalize subtitle sizes"),
            }
        }
        Ok(())
    }

    fn install_fonts(&self, input: &Path, target_dir: &Path) {
        let Some(fonts_dir) = self.config.fonts_dir() else {
            warn!("no font directory available, skipping font extraction");
            return;
        };
        let work_dir = target_dir.join("attachments");
        if let Err(e) = install_attached_fonts(self.runner.as_ref(), input, &work_dir, &fonts_dir) {
            warn!(input = %input.display(), error = %e, "font extraction failed");
        }
    }

    fn fast_variant(&self, job: &mut PipelineJob) {
        let raw_ext = if self.settings.h265 { "h265" } else { "h264" };
        let params = FastParams {
            input: job.output.clone(),
            raw_stream: job.output.with_extension(raw_ext),
            output: prefixed_path(&job.output, FAST_PREFIX),
            h265: self.settings.h265,
            source_frame_rate: job.summary.frame_rate,
            speed: self.config.fast.speed,
        };

        let runner = self.runner.as_ref();
        let result = runner
            .run_with_progress(&mut build_annexb_command(&params), job.summary.frames, "fast (1/2)")
            .and_then(|()| {
                runner.run_with_progress(&mut build_retime_command(&params), job.summary.frames, "fast (2/2)")
            });
        remove_quietly(&params.raw_stream);

        match result {
            Ok(()) => {
                if !self.config.fast.keep_slow {
                    remove_quietly(&job.output);
                }
                info!(output = %params.output.display(), "fast variant created");
                job.output = params.output;
            }
            Err(e) => {
                remove_quietly(&params.output);
                warn!(error = %e, "fast variant failed, keeping normal speed output");
            }
        }
    }

    /// Cut `[begin, end)` out of `input` without running any other stage.
    pub fn cut_file(&self, input: &Path, begin: f64, end: f64) -> Result<PathBuf, PipelineError> {
        let summary = summary_or_default(self.runner.as_ref(), input);
        Ok(cut_interval(self.runner.as_ref(), input, begin, end, &self.settings, &summary)?)
    }

    /// Write one JPEG per timestamp next to `input`.
    pub fn dump_frames(&self, input: &Path, timestamps: &[String]) -> Result<Vec<PathBuf>, PipelineError> {
        let mut written = Vec::with_capacity(timestamps.len());
        for ts in timestamps.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            let output = frame_dump_path(input, ts);
            let mut cmd = build_dump_frame_command(input, ts, &output);
            self.runner
                .capture(&mut cmd)
                .map_err(PipelineError::FrameDump)?;
            info!(frame = %output.display(), "frame written");
            written.push(output);
        }
        Ok(written)
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "could not remove file");
        }
    }
}
