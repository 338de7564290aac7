//! Transport-facing side of a subscriber session.

use crate::error::{CloseReason, Error, Result};
use crate::mailbox::TailEvent;
use std::fmt;
use std::future::Future;
use tokio::sync::mpsc;

/// One unit of a subscriber's feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The last N lines as of joining. Always first.
    Snapshot(Vec<String>),
    Line(String),
    /// The file was truncated or rotated; the lines that follow start over.
    Reset,
    /// `missed` lines were skipped because this subscriber fell behind.
    /// Reset markers are never skipped.
    Gap { missed: u64 },
    /// Final event of every feed.
    Closed(CloseReason),
}

impl From<TailEvent> for FeedEvent {
    fn from(event: TailEvent) -> Self {
        match event {
            TailEvent::Line(line) => FeedEvent::Line(line),
            TailEvent::Reset => FeedEvent::Reset,
            TailEvent::Gap { missed } => FeedEvent::Gap { missed },
        }
    }
}

/// Text form, suitable for a line-oriented push transport.
impl fmt::Display for FeedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedEvent::Snapshot(lines) => write!(f, "{}", lines.join("\n")),
            FeedEvent::Line(line) => write!(f, "{}", line),
            FeedEvent::Reset => write!(f, "[log reset]"),
            FeedEvent::Gap { missed } => write!(f, "[{} lines skipped]", missed),
            FeedEvent::Closed(reason) => write!(f, "[stream closed: {}]", reason),
        }
    }
}

/// Ordered, asynchronous destination for one subscriber's events.
pub trait Sink: Send {
    /// Delivers one event. Fails with [`Error::SinkClosed`] once the peer is gone.
    fn send(&mut self, event: FeedEvent) -> impl Future<Output = Result<()>> + Send;

    /// Resolves when the peer has gone away.
    fn closed(&self) -> impl Future<Output = ()> + Send;

    /// Ends the stream with an explicit reason.
    fn close(&mut self, reason: CloseReason) -> impl Future<Output = ()> + Send;
}

/// A sink backed by a bounded channel; the receiver is the peer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<FeedEvent>,
}

impl ChannelSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<FeedEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

impl Sink for ChannelSink {
    async fn send(&mut self, event: FeedEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|_| Error::SinkClosed)
    }

    async fn closed(&self) {
        self.tx.closed().await
    }

    async fn close(&mut self, reason: CloseReason) {
        let _ = self.tx.send(FeedEvent::Closed(reason)).await;
    }
}
