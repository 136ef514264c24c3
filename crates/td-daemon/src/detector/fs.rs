//! Filesystem watch shared by the file-based detectors
//!
//! A [`PathWatch`] observes one directory non-recursively and turns the
//! `notify` callback into an async stream. Watching the directory instead
//! of the file lets detectors see a file that does not exist yet.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::DetectorError;
use crate::coordinator::{ShutdownAck, ShutdownListener};

/// Live watch on a directory; dropping it releases the OS watch
pub struct PathWatch {
    dir: PathBuf,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    _watcher: RecommendedWatcher,
}

impl PathWatch {
    /// Start watching `dir`; fails if it does not exist
    pub fn new(dir: &Path) -> Result<Self, DetectorError> {
        let (events_tx, events) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |result| {
                // Receiver gone means the watch is being torn down
                let _ = events_tx.send(result);
            },
            Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            events,
            _watcher: watcher,
        })
    }

    /// Watched directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Next raw event. Cancel-safe.
    pub async fn next(&mut self) -> Option<notify::Result<Event>> {
        self.events.recv().await
    }

    /// Whether the watched directory still exists
    pub fn is_alive(&self) -> bool {
        self.dir.is_dir()
    }
}

/// Whether `event` concerns any of `paths`
pub fn event_touches(event: &Event, paths: &[&Path]) -> bool {
    event
        .paths
        .iter()
        .any(|p| paths.iter().any(|target| p.as_path() == *target))
}

/// Result of [`arm_watch`]
pub enum Armed {
    /// The directory is being watched
    Watching(PathWatch),
    /// Shutdown was requested first
    Shutdown(ShutdownAck),
}

/// Watch `dir`, retrying every `retry_interval` until it exists or
/// shutdown is requested
pub async fn arm_watch(
    dir: &Path,
    retry_interval: Duration,
    shutdown: &mut ShutdownListener,
) -> Armed {
    loop {
        match PathWatch::new(dir) {
            Ok(watch) => {
                tracing::debug!("Watching {}", dir.display());
                return Armed::Watching(watch);
            }
            Err(e) => {
                tracing::debug!(
                    "Cannot watch {} yet ({}), retrying in {:?}",
                    dir.display(),
                    e,
                    retry_interval
                );
            }
        }

        tokio::select! {
            ack = shutdown.requested() => return Armed::Shutdown(ack),
            _ = tokio::time::sleep(retry_interval) => {}
        }
    }
}

/// Directory holding `path`, `.` for a bare file name
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
