//! Directory watcher that fires a batch trigger once a burst of arrivals
//! has finished writing.
//!
//! Every new file matching the suffix, whether created in place or renamed
//! into the directory, gets its own quiescence
//! wait. The trigger runs when the last in-flight wait completes, so a slow
//! arrival holds back files that settled earlier.

use crate::stability::wait_for_stable;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capacity of the channel between the notify thread and the watch loop.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Error type for watcher setup.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The directory to watch does not exist.
    #[error("watch directory does not exist: {0}")]
    MissingDirectory(PathBuf),

    /// The platform watcher could not be created or attached.
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Receives the "all arrivals settled" notification.
///
/// Called from a watcher task, so implementations should hand the work off
/// (e.g. over a channel) rather than convert inline.
pub trait BatchTrigger: Send + Sync {
    fn on_batch_ready(&self);
}

/// Paths currently waiting for quiescence. The in-flight count is the size
/// of the set, so it can never go negative or count a path twice.
#[derive(Debug, Default)]
pub struct InFlight {
    paths: Mutex<HashSet<PathBuf>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start tracking `path`. Returns `false` if it is already in flight.
    pub fn admit(&self, path: &Path) -> bool {
        self.lock().insert(path.to_path_buf())
    }

    /// Stop tracking `path` and return how many files remain in flight.
    pub fn finish(&self, path: &Path) -> usize {
        let mut paths = self.lock();
        paths.remove(path);
        paths.len()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }
}

/// Polling parameters for each in-flight file.
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub poll_interval: Duration,
    pub stable_observations: u32,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            stable_observations: crate::stability::DEFAULT_STABLE_OBSERVATIONS,
        }
    }
}

/// Check whether a file name ends with `suffix`, ignoring case.
/// A bare extension such as `mkv` is treated as `.mkv`.
pub fn matches_suffix(path: &Path, suffix: &str) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_string_lossy().to_lowercase();
    let suffix = suffix.to_lowercase();
    if suffix.starts_with('.') {
        name.ends_with(&suffix)
    } else {
        name.ends_with(&format!(".{}", suffix))
    }
}

/// Paths that appeared in the directory: created there, or renamed into
/// place (e.g. `x.mkv.part` renamed to `x.mkv`).
fn arrived_paths(event: Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) => event.paths,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths,
        // Both carries [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.into_iter().skip(1).collect()
        }
        _ => Vec::new(),
    }
}

/// Watches one directory (non-recursive) for new files.
pub struct IngestWatcher {
    dir: PathBuf,
    suffix: String,
    options: WatchOptions,
    trigger: Arc<dyn BatchTrigger>,
    in_flight: Arc<InFlight>,
}

impl IngestWatcher {
    pub fn new(
        dir: impl Into<PathBuf>,
        suffix: impl Into<String>,
        options: WatchOptions,
        trigger: Arc<dyn BatchTrigger>,
    ) -> Self {
        Self {
            dir: dir.into(),
            suffix: suffix.into(),
            options,
            trigger,
            in_flight: Arc::new(InFlight::new()),
        }
    }

    pub fn in_flight(&self) -> Arc<InFlight> {
        Arc::clone(&self.in_flight)
    }

    /// Handle one creation event. Duplicates of an in-flight path and
    /// non-matching names are ignored. Returns whether a wait was started.
    pub fn handle_created(&self, path: PathBuf) -> bool {
        if !matches_suffix(&path, &self.suffix) {
            return false;
        }
        if !self.in_flight.admit(&path) {
            debug!(path = %path.display(), "already waiting on file, ignoring event");
            return false;
        }

        info!(
            path = %path.display(),
            in_flight = self.in_flight.count(),
            "new file, waiting for it to settle"
        );

        let in_flight = Arc::clone(&self.in_flight);
        let trigger = Arc::clone(&self.trigger);
        let options = self.options;
        tokio::spawn(async move {
            match wait_for_stable(&path, options.poll_interval, options.stable_observations).await {
                Ok(size) => {
                    let remaining = in_flight.finish(&path);
                    info!(path = %path.display(), size, remaining, "file settled");
                    if remaining == 0 {
                        trigger.on_batch_ready();
                    }
                }
                Err(e) => {
                    let remaining = in_flight.finish(&path);
                    warn!(error = %e, remaining, "dropping file from watch");
                }
            }
        });
        true
    }

    /// Watch until the process exits.
    pub async fn run(self) -> Result<(), WatchError> {
        self.run_until(std::future::pending()).await
    }

    /// Watch until `shutdown` resolves or the event source goes away.
    ///
    /// Waits already in flight keep running on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), WatchError>
    where
        F: Future<Output = ()>,
    {
        if !self.dir.is_dir() {
            return Err(WatchError::MissingDirectory(self.dir.clone()));
        }

        let (event_tx, mut event_rx) =
            mpsc::channel::<notify::Result<Event>>(EVENT_CHANNEL_CAPACITY);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = event_tx.blocking_send(res);
            },
            Config::default(),
        )?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;
        info!(dir = %self.dir.display(), suffix = %self.suffix, "watching directory");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(dir = %self.dir.display(), "watch stopped");
                    break;
                }
                received = event_rx.recv() => {
                    match received {
                        Some(Ok(event)) => {
                            for path in arrived_paths(event) {
                                self.handle_created(path);
                            }
                        }
                        Some(Err(e)) => warn!(error = %e, "file watcher error"),
                        None => break,
                    }
                }
            }
        }

        drop(watcher);
        Ok(())
    }
}
