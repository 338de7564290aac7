//! Change signals for the watched file.
//!
//! Signals are hints, not data: several writes may collapse into one signal,
//! and the supervisor always re-reads the file to find out what changed.

use crate::config::{DEFAULT_POLL_INTERVAL, WatchMode};
use crate::error::{Error, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

enum Source {
    Notify {
        _watcher: RecommendedWatcher,
        receiver: mpsc::Receiver<notify::Result<()>>,
    },
    Poll(Interval),
    Stopped,
}

/// A coalescing source of "the file may have changed" signals.
///
/// Dropping the watcher, or calling [`stop`](Self::stop), unsubscribes.
/// Opening a new one resubscribes.
pub struct Watcher {
    source: Source,
    file_path: PathBuf,
}

impl Watcher {
    /// Opens a watcher for `path` according to `mode`.
    pub fn open<P: AsRef<Path>>(path: P, mode: WatchMode) -> Result<Self> {
        let path = path.as_ref();
        match mode {
            WatchMode::Notify => Self::notify(path),
            WatchMode::Poll(interval) => Ok(Self::poll(path, interval)),
            WatchMode::Auto => match Self::notify(path) {
                Ok(watcher) => Ok(watcher),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "OS file notifications unavailable, falling back to polling"
                    );
                    Ok(Self::poll(path, DEFAULT_POLL_INTERVAL))
                }
            },
        }
    }

    /// Watches the file's directory through OS notifications.
    ///
    /// The directory is watched rather than the file so that re-created
    /// (rotated) files keep producing events.
    pub fn notify<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file_path = path.as_ref().to_path_buf();
        let file_name = file_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| Error::InvalidConfig {
                message: format!("{} does not name a file", file_path.display()),
            })?;

        // Capacity one: pending signals coalesce into a single wake-up.
        let (tx, rx) = mpsc::channel(1);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if is_change_event(&event) && is_event_relevant_to_file(&event, &file_name) {
                        let _ = tx.try_send(Ok(()));
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                }
            },
            Config::default(),
        )?;

        watcher.watch(watch_dir(&file_path), RecursiveMode::NonRecursive)?;
        debug!(path = %file_path.display(), "Watching for OS file notifications");

        Ok(Self {
            source: Source::Notify {
                _watcher: watcher,
                receiver: rx,
            },
            file_path,
        })
    }

    /// Signals on a fixed interval, for filesystems without notifications.
    pub fn poll<P: AsRef<Path>>(path: P, interval: Duration) -> Self {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(path = %path.as_ref().display(), period = ?interval.period(), "Polling for changes");

        Self {
            source: Source::Poll(interval),
            file_path: path.as_ref().to_path_buf(),
        }
    }

    /// Waits for the next signal. `None` once stopped.
    pub async fn next_signal(&mut self) -> Option<Result<()>> {
        match &mut self.source {
            Source::Notify { receiver, .. } => receiver
                .recv()
                .await
                .map(|signal| signal.map_err(Error::Watcher)),
            Source::Poll(interval) => {
                interval.tick().await;
                Some(Ok(()))
            }
            Source::Stopped => None,
        }
    }

    /// Unsubscribes from the underlying source.
    pub fn stop(&mut self) {
        self.source = Source::Stopped;
    }

    pub fn is_polling(&self) -> bool {
        matches!(self.source, Source::Poll(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.source, Source::Stopped)
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

fn watch_dir(file_path: &Path) -> &Path {
    match file_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Our own reads show up as access events; only other kinds can mean growth.
fn is_change_event(event: &Event) -> bool {
    !matches!(event.kind, EventKind::Access(_))
}

/// Check if a notify event is relevant to a specific file
fn is_event_relevant_to_file(event: &Event, target_file_name: &str) -> bool {
    event.paths.iter().any(|path| {
        path.file_name()
            .map(|name| name.to_string_lossy() == target_file_name)
            .unwrap_or(false)
    })
}
