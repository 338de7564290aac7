//! Configuration for a tail service.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lines sent in a snapshot when the caller does not choose a count.
pub const DEFAULT_SNAPSHOT_LINES: usize = 10;
/// Bytes read per step while scanning backward for a snapshot.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;
/// Lines buffered per subscriber before the oldest is dropped.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;
/// Period of the timer fallback when OS notifications are unavailable.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Where change signals come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchMode {
    /// OS notifications, falling back to polling if they cannot be set up.
    #[default]
    Auto,
    /// OS notifications only.
    Notify,
    /// Fixed-interval timer.
    Poll(Duration),
}

/// Settings for tailing one file.
#[derive(Debug, Clone)]
pub struct TailConfig {
    pub path: PathBuf,
    pub snapshot_lines: usize,
    pub block_size: usize,
    pub mailbox_capacity: usize,
    pub separator: String,
    pub watch: WatchMode,
}

impl TailConfig {
    /// Creates a configuration with defaults for everything but the path.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            snapshot_lines: DEFAULT_SNAPSHOT_LINES,
            block_size: DEFAULT_BLOCK_SIZE,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            separator: "\n".to_string(),
            watch: WatchMode::default(),
        }
    }

    pub fn snapshot_lines(mut self, lines: usize) -> Self {
        self.snapshot_lines = lines;
        self
    }

    pub fn block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn mailbox_capacity(mut self, events: usize) -> Self {
        self.mailbox_capacity = events;
        self
    }

    pub fn separator<S: Into<String>>(mut self, separator: S) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn watch(mut self, mode: WatchMode) -> Self {
        self.watch = mode;
        self
    }

    /// Checks values that would make the engine misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(invalid("path must not be empty"));
        }
        if self.block_size == 0 {
            return Err(invalid("block_size must be greater than zero"));
        }
        if self.mailbox_capacity == 0 {
            return Err(invalid("mailbox_capacity must be greater than zero"));
        }
        if self.separator.is_empty() {
            return Err(invalid("separator must not be empty"));
        }
        if matches!(self.watch, WatchMode::Poll(interval) if interval.is_zero()) {
            return Err(invalid("poll interval must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfig {
        message: message.to_string(),
    }
}
