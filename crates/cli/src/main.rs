//! CLI entry point for hardsub
//!
//! Parses command line arguments, loads the configuration and runs one
//! batch, the watcher, or a single-file operation.

use clap::Parser;
use hardsub::config::{default_config_path, Config};
use hardsub::{parse_timestamp, ConversionPipeline, Daemon, ProcessRunner, SystemRunner};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// hardsub - burn subtitles into matroska files
#[derive(Parser, Debug)]
#[command(name = "hardsub")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder with the files to convert
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Folder receiving the converted files
    #[arg(short, long)]
    target: Option<PathBuf>,

    /// Preferred audio language (IETF tag prefix)
    #[arg(long)]
    audio_lang: Option<String>,

    /// Preferred subtitle language (IETF tag prefix)
    #[arg(long)]
    subs_lang: Option<String>,

    /// Constant rate factor for the main encode
    #[arg(long)]
    crf: Option<u32>,

    /// Encode with libx265
    #[arg(long)]
    h265: bool,

    /// Write matroska with the original audio instead of mp4
    #[arg(long)]
    mkv: bool,

    /// Keep watching the source folder and convert new arrivals
    #[arg(short, long, conflicts_with = "first_only")]
    watch: bool,

    /// Stop after the first file of the batch
    #[arg(long)]
    first_only: bool,

    /// Use this audio track id instead of the language heuristics
    #[arg(long)]
    force_audio_track: Option<u32>,

    /// Use this subtitle track id instead of the language heuristics
    #[arg(long)]
    force_subs_track: Option<u32>,

    /// Operate on a single file instead of the source folder
    #[arg(short, long, conflicts_with = "watch")]
    file: Option<PathBuf>,

    /// Start of the interval to cut out of --file ([HH:]MM:SS or seconds)
    #[arg(long, requires_all = ["file", "cut_end"], value_parser = parse_position)]
    cut_start: Option<f64>,

    /// End of the interval to cut out of --file
    #[arg(long, requires_all = ["file", "cut_start"], value_parser = parse_position)]
    cut_end: Option<f64>,

    /// Comma-separated timestamps to dump from --file as JPEG images
    #[arg(long, requires = "file", value_delimiter = ',')]
    dump_frames_at: Vec<String>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    /// Skip the external tool checks. For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

fn parse_position(raw: &str) -> Result<f64, String> {
    parse_timestamp(raw).ok_or_else(|| format!("invalid timestamp '{}'", raw))
}

/// Load the config file, writing the default one on first run when the
/// default location is used.
fn load_config(explicit: Option<&Path>) -> Result<Config, String> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = default_config_path().ok_or("could not determine the user config directory")?;
            if !path.exists() {
                Config::write_default(&path).map_err(|e| e.to_string())?;
                info!(path = %path.display(), "wrote default configuration");
            }
            path
        }
    };
    info!(path = %path.display(), "loading configuration");
    Config::load(&path).map_err(|e| format!("{}: {}", path.display(), e))
}

fn apply_args(config: &mut Config, args: &Args) {
    if let Some(source) = &args.source {
        config.paths.source_dir = source.clone();
    }
    if let Some(target) = &args.target {
        config.paths.target_dir = target.clone();
    }
    if let Some(lang) = &args.audio_lang {
        config.languages.audio = lang.clone();
    }
    if let Some(lang) = &args.subs_lang {
        config.languages.subtitles = lang.clone();
    }
    if let Some(crf) = args.crf {
        config.encoding.crf = crf;
    }
    if args.h265 {
        config.encoding.h265 = true;
    }
    if args.mkv {
        config.encoding.mkv = true;
    }
}

async fn run_single_file(pipeline: Arc<ConversionPipeline>, file: PathBuf, args: &Args) -> ExitCode {
    let cut = args.cut_start.zip(args.cut_end);
    let timestamps = args.dump_frames_at.clone();

    let result = tokio::task::spawn_blocking(move || {
        if !timestamps.is_empty() {
            pipeline.dump_frames(&file, &timestamps).map(|frames| frames.len())
        } else if let Some((begin, end)) = cut {
            pipeline.cut_file(&file, begin, end).map(|_| 1)
        } else {
            pipeline.convert_file(&file).map(|_| 1)
        }
    })
    .await;

    match result {
        Ok(Ok(written)) => {
            info!(written, "done");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!(error = %e, "operation failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "operation panicked");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // RUST_LOG wins when set
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if args.verbose {
            "hardsub=debug".to_string()
        } else {
            "hardsub=info".to_string()
        }
    });
    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    let mut config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    apply_args(&mut config, &args);

    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
    let pipeline = ConversionPipeline::new(config, runner)
        .with_forced_tracks(args.force_audio_track, args.force_subs_track);

    let daemon = if args.skip_checks {
        info!("skipping startup checks (--skip-checks enabled)");
        Daemon::new(pipeline)
    } else {
        match Daemon::with_checks(pipeline) {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    };

    if let Some(file) = args.file.clone() {
        return run_single_file(daemon.pipeline(), file, &args).await;
    }

    if args.watch {
        let shutdown = async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, shutting down");
            }
        };
        if let Err(e) = daemon.run_watch_until(shutdown).await {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    let report = daemon.run_batch(args.first_only).await;
    info!(
        converted = report.converted.len(),
        failed = report.failed.len(),
        "all done"
    );
    ExitCode::SUCCESS
}
