//! hardsub
//!
//! Burns the preferred subtitle track of matroska files into the video,
//! either as a one-off batch over a folder or continuously as files arrive.

pub mod archive;
pub mod daemon;
pub mod deliver;
pub mod detox;
pub mod encode;
pub mod fonts;
pub mod intro;
pub mod pipeline;
pub mod probe;
pub mod process;
pub mod scan;
pub mod stability;
pub mod startup;
pub mod subfix;
pub mod tracks;
pub mod watch;

#[cfg(test)]
mod testing;

pub use daemon::{BatchReport, Daemon, DaemonError};
pub use hardsub_config as config;
pub use hardsub_config::Config;
pub use intro::parse_timestamp;
pub use pipeline::{ConversionPipeline, PipelineError, PipelineJob};
pub use process::{ProcessError, ProcessRunner, SystemRunner};
pub use startup::{run_startup_checks, StartupError};
pub use tracks::{select_tracks, SubtitleKind, TrackError, TrackPreferences, TrackSelection};
pub use watch::{BatchTrigger, IngestWatcher, WatchError, WatchOptions};
