//! Batch and watch orchestration around the conversion pipeline.
//!
//! Files are converted one at a time. In watch mode the watcher's trigger
//! only enqueues a batch; a single consumer task runs them, so two triggers
//! never convert concurrently.

use crate::deliver::{copy_to_remote, Notifier};
use crate::detox::detox_directory;
use crate::pipeline::ConversionPipeline;
use crate::scan::scan_source_dir;
use crate::startup::{run_startup_checks, StartupError};
use crate::watch::{BatchTrigger, InFlight, IngestWatcher, WatchError, WatchOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Watcher setup failed
    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),
}

/// Outcome of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Final artifacts of the successful conversions
    pub converted: Vec<PathBuf>,
    /// Sources whose conversion failed
    pub failed: Vec<PathBuf>,
}

impl BatchReport {
    pub fn attempted(&self) -> usize {
        self.converted.len() + self.failed.len()
    }
}

/// Sends one message per trigger into a queue of depth one. A full queue
/// means a batch is already pending and will see the new files too.
struct QueueTrigger(mpsc::Sender<()>);

impl BatchTrigger for QueueTrigger {
    fn on_batch_ready(&self) {
        if self.0.try_send(()).is_err() {
            info!("batch already pending");
        }
    }
}

/// Runtime state shared by batch and watch mode
#[derive(Clone)]
pub struct Daemon {
    pipeline: Arc<ConversionPipeline>,
    notifier: Notifier,
}

impl Daemon {
    /// Create the daemon without checking for external tools.
    pub fn new(pipeline: ConversionPipeline) -> Self {
        let notifier = Notifier::new(pipeline.config().pushover.clone());
        Self {
            pipeline: Arc::new(pipeline),
            notifier,
        }
    }

    /// Create the daemon after verifying the required tools are installed.
    pub fn with_checks(pipeline: ConversionPipeline) -> Result<Self, DaemonError> {
        run_startup_checks()?;
        Ok(Self::new(pipeline))
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn pipeline(&self) -> Arc<ConversionPipeline> {
        Arc::clone(&self.pipeline)
    }

    /// Detox, scan and convert every matching file in the source directory.
    ///
    /// A failed file is logged and the batch moves on. With `first_only`
    /// the batch stops after the first attempt.
    pub async fn run_batch(&self, first_only: bool) -> BatchReport {
        self.run_settled_batch(first_only, None).await
    }

    /// A batch that leaves alone every file still in `in_flight`. Those are
    /// picked up by the batch their own settling triggers.
    async fn run_settled_batch(&self, first_only: bool, in_flight: Option<&InFlight>) -> BatchReport {
        let still_writing = |path: &Path| in_flight.is_some_and(|files| files.contains(path));
        let config = self.pipeline.config();
        let source_dir = config.paths.source_dir.clone();
        let extension = config.paths.extension.clone();

        if config.detox.enabled {
            match detox_directory(&source_dir, &extension, &config.detox.remove_words, still_writing) {
                Ok(0) => {}
                Ok(renamed) => info!(renamed, "cleaned up file names"),
                Err(e) => warn!(dir = %source_dir.display(), error = %e, "file name cleanup failed"),
            }
        }

        let candidates = scan_source_dir(&source_dir, &extension);
        info!(dir = %source_dir.display(), count = candidates.len(), "batch started");

        let mut report = BatchReport::default();
        for candidate in candidates {
            if still_writing(&candidate.path) {
                info!(path = %candidate.path.display(), "still being written, leaving for a later batch");
                continue;
            }
            let pipeline = Arc::clone(&self.pipeline);
            let path = candidate.path.clone();
            let result = tokio::task::spawn_blocking(move || pipeline.convert_file(&path)).await;

            match result {
                Ok(Ok(output)) => {
                    self.deliver(output.clone()).await;
                    report.converted.push(output);
                }
                Ok(Err(e)) => {
                    error!(path = %candidate.path.display(), error = %e, "conversion failed");
                    report.failed.push(candidate.path);
                }
                Err(e) => {
                    error!(path = %candidate.path.display(), error = %e, "conversion task panicked");
                    report.failed.push(candidate.path);
                }
            }

            if first_only {
                break;
            }
        }

        info!(
            converted = report.converted.len(),
            failed = report.failed.len(),
            "batch finished"
        );
        report
    }

    /// Remote copy and notification. Both only log on failure.
    async fn deliver(&self, output: PathBuf) {
        let scp = self.pipeline.config().scp.clone();
        if scp.is_enabled() {
            let runner = self.pipeline.runner();
            let file = output.clone();
            let copied =
                tokio::task::spawn_blocking(move || copy_to_remote(runner.as_ref(), &file, &scp)).await;
            match copied {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(output = %output.display(), error = %e, "remote copy failed"),
                Err(e) => warn!(error = %e, "remote copy task panicked"),
            }
        }

        if self.notifier.is_enabled() {
            let name = output
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Err(e) = self.notifier.notify("hardsub", &format!("Converted {}", name)).await {
                warn!(error = %e, "notification failed");
            }
        }
    }

    /// Convert what is already there, then watch until the process exits.
    pub async fn run_watch(&self) -> Result<(), DaemonError> {
        self.run_watch_until(std::future::pending()).await
    }

    /// Convert what is already there, then watch the source directory until
    /// `shutdown` resolves. A batch runs each time a burst of arrivals has
    /// settled.
    pub async fn run_watch_until<F>(&self, shutdown: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()>,
    {
        let config = self.pipeline.config();
        let options = WatchOptions {
            poll_interval: Duration::from_millis(config.watch.poll_interval_ms),
            stable_observations: config.watch.stable_observations,
        };

        let (batch_tx, mut batch_rx) = mpsc::channel::<()>(1);
        let watcher = IngestWatcher::new(
            config.paths.source_dir.clone(),
            config.paths.extension.clone(),
            options,
            Arc::new(QueueTrigger(batch_tx)),
        );

        self.run_batch(false).await;

        let consumer = self.clone();
        let in_flight = watcher.in_flight();
        let batches = tokio::spawn(async move {
            while batch_rx.recv().await.is_some() {
                consumer.run_settled_batch(false, Some(&in_flight)).await;
            }
        });

        let result = watcher.run_until(shutdown).await;
        batches.abort();
        result.map_err(DaemonError::from)
    }
}
