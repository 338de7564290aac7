//! The single owner of the read offset for one watched file.
//!
//! ```text
//!   Uninitialized ──start()──► Running ──source lost / shutdown──► Stopped
//! ```
//!
//! Every watcher signal becomes one `delta` read. Lines go to the
//! broadcaster; a shrunk file becomes a reset marker plus a fresh snapshot;
//! an unreadable file closes every subscriber with an explicit reason.

use crate::broadcast::Broadcaster;
use crate::error::{CloseReason, Result};
use crate::reader::{DeltaRead, TailReader};
use crate::watcher::Watcher;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Uninitialized,
    Running,
    Stopped,
}

pub struct TailSupervisor {
    reader: TailReader,
    broadcaster: Broadcaster,
    snapshot_lines: usize,
    offset: u64,
    state: SupervisorState,
}

impl TailSupervisor {
    pub fn new(reader: TailReader, broadcaster: Broadcaster, snapshot_lines: usize) -> Self {
        Self {
            reader,
            broadcaster,
            snapshot_lines,
            offset: 0,
            state: SupervisorState::Uninitialized,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Establishes the starting offset from a snapshot of the file.
    pub async fn start(&mut self) -> Result<u64> {
        if self.state != SupervisorState::Uninitialized {
            return Ok(self.offset);
        }

        match self.reader.snapshot(0).await {
            Ok(snapshot) => {
                self.offset = snapshot.offset;
                self.broadcaster.establish(snapshot.offset);
                self.state = SupervisorState::Running;
                info!(
                    path = %self.reader.path().display(),
                    offset = self.offset,
                    "Tail supervisor running"
                );
                Ok(self.offset)
            }
            Err(e) => {
                self.fail(e.to_string());
                Err(e)
            }
        }
    }

    /// Reads whatever was appended since the last call and publishes it.
    ///
    /// Returns the number of lines published.
    pub async fn poll_once(&mut self) -> Result<usize> {
        if self.state != SupervisorState::Running {
            return Ok(0);
        }

        let read = match self.reader.delta(self.offset).await {
            Ok(read) => read,
            Err(e) => {
                self.fail(e.to_string());
                return Err(e);
            }
        };

        match read {
            DeltaRead::Lines(delta) => {
                if delta.is_empty() {
                    return Ok(0);
                }
                debug!(lines = delta.lines.len(), offset = delta.offset, "Publishing delta");
                self.offset = delta.offset;
                self.broadcaster.publish(&delta);
                Ok(delta.lines.len())
            }
            DeltaRead::Truncated { size } => {
                info!(size, previous = self.offset, "Log truncated, resetting subscribers");
                let snapshot = match self.reader.snapshot(self.snapshot_lines).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        self.fail(e.to_string());
                        return Err(e);
                    }
                };
                self.offset = snapshot.offset;
                self.broadcaster.reset(&snapshot);
                Ok(snapshot.lines.len())
            }
        }
    }

    /// Publishes anything still pending, including an unterminated last line,
    /// then closes every subscriber.
    pub async fn shutdown(&mut self) {
        if self.state == SupervisorState::Running && self.poll_once().await.is_ok() {
            self.flush_remainder().await;
        }
        if self.state != SupervisorState::Stopped {
            self.state = SupervisorState::Stopped;
            self.broadcaster.close_all(CloseReason::Shutdown);
            info!(path = %self.reader.path().display(), "Tail supervisor stopped");
        }
    }

    async fn flush_remainder(&mut self) {
        match self.reader.remainder(self.offset).await {
            Ok(Some(fragment)) => {
                self.offset = fragment.offset;
                self.broadcaster.publish(&fragment);
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Could not flush trailing fragment"),
        }
    }

    fn fail(&mut self, message: String) {
        warn!(path = %self.reader.path().display(), error = %message, "Log source lost");
        self.state = SupervisorState::Stopped;
        self.broadcaster.close_all(CloseReason::SourceLost(message));
    }

    /// Task loop: one read per signal until shutdown or a fatal error.
    pub async fn run(mut self, mut watcher: Watcher, shutdown: CancellationToken) -> SupervisorState {
        if self.start().await.is_err() {
            return self.state;
        }
        // Catch writes that landed between the snapshot and the first signal.
        if self.poll_once().await.is_err() {
            return self.state;
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    watcher.stop();
                    self.shutdown().await;
                    break;
                }
                signal = watcher.next_signal() => match signal {
                    Some(Ok(())) => {
                        if self.poll_once().await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        self.fail(e.to_string());
                        break;
                    }
                    None => {
                        self.fail("file watcher stopped".to_string());
                        break;
                    }
                },
            }
        }

        self.state
    }
}
