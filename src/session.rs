//! One observer's lifecycle: join, snapshot, stream, leave.

use crate::broadcast::Broadcaster;
use crate::error::CloseReason;
use crate::mailbox::{Mailbox, TailEvent};
use crate::reader::TailReader;
use crate::sink::{FeedEvent, Sink};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives one subscriber from join to leave.
#[derive(Clone)]
pub struct Session {
    broadcaster: Broadcaster,
    reader: TailReader,
    lines: usize,
}

impl Session {
    pub fn new(broadcaster: Broadcaster, reader: TailReader, lines: usize) -> Self {
        Self {
            broadcaster,
            reader,
            lines,
        }
    }

    /// Streams into `sink` until the sink, the source, or `cancel` ends it.
    ///
    /// The mailbox is released on every exit path, and the sink is closed with
    /// the returned reason unless its peer is already gone.
    pub async fn run<S: Sink>(self, mut sink: S, cancel: CancellationToken) -> CloseReason {
        let mut mailbox = self.broadcaster.join();
        let id = mailbox.id();
        debug!(subscriber = %id, offset = mailbox.join_offset(), "Subscriber joined");

        let reason = self.stream(&mut mailbox, &mut sink, &cancel).await;
        drop(mailbox);

        match &reason {
            CloseReason::SinkClosed | CloseReason::Disconnected => {
                debug!(subscriber = %id, %reason, "Subscriber left");
            }
            CloseReason::Shutdown => info!(subscriber = %id, "Subscriber closed for shutdown"),
            CloseReason::SourceLost(_) => warn!(subscriber = %id, %reason, "Subscriber closed"),
        }

        if reason != CloseReason::SinkClosed {
            sink.close(reason.clone()).await;
        }
        reason
    }

    async fn stream<S: Sink>(
        &self,
        mailbox: &mut Mailbox,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> CloseReason {
        // Anchored at the join offset so the snapshot and the mailbox neither
        // overlap nor leave a hole.
        let snapshot = match self.reader.snapshot_at(mailbox.join_offset(), self.lines).await {
            Ok(snapshot) => snapshot,
            Err(e) => return CloseReason::SourceLost(e.to_string()),
        };
        if let Err(reason) = forward(sink, FeedEvent::Snapshot(snapshot.lines), cancel).await {
            return reason;
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return CloseReason::Disconnected,
                _ = sink.closed() => return CloseReason::SinkClosed,
                event = mailbox.recv() => event,
            };

            match event {
                Ok(event) => {
                    if let TailEvent::Gap { missed } = event {
                        debug!(subscriber = %mailbox.id(), missed, "Subscriber fell behind");
                    }
                    if let Err(reason) = forward(sink, event.into(), cancel).await {
                        return reason;
                    }
                }
                Err(reason) => return reason,
            }
        }
    }
}

async fn forward<S: Sink>(
    sink: &mut S,
    event: FeedEvent,
    cancel: &CancellationToken,
) -> Result<(), CloseReason> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CloseReason::Disconnected),
        sent = sink.send(event) => sent.map_err(|_| CloseReason::SinkClosed),
    }
}

/// A spawned session.
pub struct SessionHandle {
    cancel: CancellationToken,
    task: JoinHandle<CloseReason>,
}

impl SessionHandle {
    pub fn spawn<S: Sink + 'static>(session: Session, sink: S) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(session.run(sink, cancel.clone()));
        Self { cancel, task }
    }

    /// Asks the session to stop; it closes its sink with `Disconnected`.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the session to end and returns why it ended.
    pub async fn join(self) -> CloseReason {
        match self.task.await {
            Ok(reason) => reason,
            Err(e) => CloseReason::SourceLost(format!("session task failed: {}", e)),
        }
    }
}
