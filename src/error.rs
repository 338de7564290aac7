//! Error types for the tail engine.

use std::fmt;
use thiserror::Error;

/// The main error type for tail operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The watched file is missing or cannot be read.
    #[error("Log source unavailable: {path}: {source}")]
    SourceUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O errors outside of the watched file itself.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File watching errors from the notify crate.
    #[error("File watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// Rejected configuration value.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// A sink refused a message because its peer went away.
    #[error("Sink closed")]
    SinkClosed,

    /// The service no longer accepts subscribers.
    #[error("Stream closed")]
    StreamClosed,
}

/// A convenient Result type for tail operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn source_unavailable(path: &std::path::Path, source: std::io::Error) -> Self {
        Error::SourceUnavailable {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Why a subscriber's stream ended.
///
/// Every feed ends with exactly one of these so a client never hangs silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The watched file disappeared or became unreadable.
    SourceLost(String),
    /// The service is shutting down.
    Shutdown,
    /// The subscriber was cancelled by its owner.
    Disconnected,
    /// The sink's peer went away.
    SinkClosed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::SourceLost(message) => write!(f, "source lost: {}", message),
            CloseReason::Shutdown => write!(f, "server shutting down"),
            CloseReason::Disconnected => write!(f, "disconnected"),
            CloseReason::SinkClosed => write!(f, "sink closed"),
        }
    }
}
