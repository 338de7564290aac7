//! Wiring for one watched file: reader, watcher, supervisor and broadcaster.

use crate::broadcast::Broadcaster;
use crate::config::TailConfig;
use crate::error::{Error, Result};
use crate::reader::TailReader;
use crate::session::{Session, SessionHandle};
use crate::sink::Sink;
use crate::stream::TailFeed;
use crate::supervisor::{SupervisorState, TailSupervisor};
use crate::watcher::Watcher;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Serves live tails of one file to any number of subscribers.
pub struct TailService {
    config: TailConfig,
    reader: TailReader,
    broadcaster: Broadcaster,
    shutdown: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<SupervisorState>>>,
}

impl TailService {
    /// Validates `config`, takes the initial offset and spawns the supervisor.
    ///
    /// Fails with [`Error::SourceUnavailable`] if the file cannot be read.
    pub async fn start(config: TailConfig) -> Result<Self> {
        config.validate()?;

        let reader = TailReader::new(&config.path, &config.separator, config.block_size);
        let broadcaster = Broadcaster::new(config.mailbox_capacity);
        let watcher = Watcher::open(&config.path, config.watch)?;

        let mut supervisor =
            TailSupervisor::new(reader.clone(), broadcaster.clone(), config.snapshot_lines);
        supervisor.start().await?;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(supervisor.run(watcher, shutdown.clone()));

        info!(path = %config.path.display(), "Tail service started");

        Ok(Self {
            config,
            reader,
            broadcaster,
            shutdown,
            supervisor: Mutex::new(Some(handle)),
        })
    }

    /// Opens a feed whose first event is the last `lines` lines.
    pub fn open_tail(&self, lines: usize) -> Result<TailFeed> {
        self.ensure_open()?;
        Ok(TailFeed::spawn(self.session(lines)))
    }

    /// Opens a feed with the configured snapshot size.
    pub fn open_default_tail(&self) -> Result<TailFeed> {
        self.open_tail(self.config.snapshot_lines)
    }

    /// Runs a session over a caller-provided sink.
    pub fn attach<S: Sink + 'static>(&self, sink: S, lines: usize) -> Result<SessionHandle> {
        self.ensure_open()?;
        Ok(SessionHandle::spawn(self.session(lines), sink))
    }

    /// Stops the watcher and supervisor, then closes every subscriber with
    /// [`CloseReason::Shutdown`](crate::CloseReason::Shutdown).
    pub async fn shutdown(&self) -> SupervisorState {
        self.shutdown.cancel();

        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();

        let state = match handle {
            Some(handle) => handle.await.unwrap_or(SupervisorState::Stopped),
            None => SupervisorState::Stopped,
        };
        info!(path = %self.config.path.display(), "Tail service stopped");
        state
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    pub fn config(&self) -> &TailConfig {
        &self.config
    }

    fn session(&self, lines: usize) -> Session {
        Session::new(self.broadcaster.clone(), self.reader.clone(), lines)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::StreamClosed);
        }
        Ok(())
    }
}

impl Drop for TailService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
