//! Streams newly appended lines of a growing log file to many concurrent
//! subscribers.
//!
//! One [`TailService`] per file owns the read offset and a registry of
//! per-subscriber mailboxes. Each subscriber gets a snapshot of the last N
//! lines, then every complete line appended after it joined, in order.
//!
//! # Example
//!
//! ```rust,no_run
//! use log_tail::{FeedEvent, TailConfig, TailService};
//! use tokio_stream::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = TailService::start(TailConfig::new("app.log")).await?;
//!     let mut feed = service.open_tail(10)?;
//!
//!     while let Some(event) = feed.next().await {
//!         match event {
//!             FeedEvent::Closed(reason) => {
//!                 eprintln!("closed: {}", reason);
//!                 break;
//!             }
//!             other => println!("{}", other),
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

// Internal modules - not part of public API
mod broadcast;
mod config;
mod error;
mod mailbox;
mod reader;
mod service;
mod session;
mod sink;
mod stream;
mod supervisor;
mod watcher;

#[cfg(test)]
mod test_helpers;

// Public API exports
pub use broadcast::Broadcaster;
pub use config::{
    DEFAULT_BLOCK_SIZE, DEFAULT_MAILBOX_CAPACITY, DEFAULT_POLL_INTERVAL, DEFAULT_SNAPSHOT_LINES,
    TailConfig, WatchMode,
};
pub use error::{CloseReason, Error, Result};
pub use mailbox::{Mailbox, SubscriberId, TailEvent};
pub use reader::{Delta, DeltaRead, Snapshot, TailReader};
pub use service::TailService;
pub use session::{Session, SessionHandle};
pub use sink::{ChannelSink, FeedEvent, Sink};
pub use stream::TailFeed;
pub use supervisor::{SupervisorState, TailSupervisor};
pub use watcher::Watcher;

use std::path::Path;

/// Starts a service for `path` with default settings.
///
/// # Example
///
/// ```rust,no_run
/// use log_tail::tail_log;
/// use tokio_stream::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = tail_log("app.log").await?;
///     let mut feed = service.open_default_tail()?;
///
///     while let Some(event) = feed.next().await {
///         println!("{}", event);
///     }
///
///     Ok(())
/// }
/// ```
pub async fn tail_log<P: AsRef<Path>>(path: P) -> Result<TailService> {
    TailService::start(TailConfig::new(path)).await
}
