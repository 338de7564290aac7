//! Live feed for one subscriber, exposed as an async stream.

use crate::session::{Session, SessionHandle};
use crate::sink::{ChannelSink, FeedEvent};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Events buffered between a session and the feed's consumer.
const FEED_BUFFER: usize = 64;

/// A subscriber's view of the log.
///
/// Yields the snapshot first, then lines and markers, and finally one
/// [`FeedEvent::Closed`] before ending. Dropping the feed disconnects it.
pub struct TailFeed {
    receiver: mpsc::Receiver<FeedEvent>,
    session: SessionHandle,
}

impl TailFeed {
    pub(crate) fn spawn(session: Session) -> Self {
        let (sink, receiver) = ChannelSink::new(FEED_BUFFER);
        let session = SessionHandle::spawn(session, sink);
        Self { receiver, session }
    }

    /// Stops the session; the feed then yields `Closed(Disconnected)` and ends.
    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    /// Check if the session behind this feed has finished
    pub fn is_finished(&self) -> bool {
        self.session.is_finished()
    }
}

impl Drop for TailFeed {
    fn drop(&mut self) {
        self.session.disconnect();
    }
}

impl Stream for TailFeed {
    type Item = FeedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::error::CloseReason;
    use crate::reader::{Delta, TailReader};
    use crate::test_helpers::{TempLogFile, collect_events};
    use std::time::Duration;
    use tokio_stream::StreamExt;

    fn feed_for(temp: &TempLogFile, broadcaster: &Broadcaster, lines: usize) -> TailFeed {
        let reader = TailReader::new(temp.path(), "\n", 4096);
        TailFeed::spawn(Session::new(broadcaster.clone(), reader, lines))
    }

    #[tokio::test]
    async fn test_feed_starts_with_snapshot() {
        let temp = TempLogFile::with_lines(&["first", "second"]).unwrap();
        let broadcaster = Broadcaster::new(16);
        broadcaster.establish(temp.len());
        let mut feed = feed_for(&temp, &broadcaster, 10);

        let events = collect_events(&mut feed, 1, Duration::from_secs(1)).await;

        assert_eq!(
            events,
            vec![FeedEvent::Snapshot(vec!["first".to_string(), "second".to_string()])]
        );
        assert!(!feed.is_finished());
    }

    #[tokio::test]
    async fn test_feed_ends_after_closed_event() {
        let temp = TempLogFile::with_lines(&["only"]).unwrap();
        let broadcaster = Broadcaster::new(16);
        broadcaster.establish(temp.len());
        let mut feed = feed_for(&temp, &broadcaster, 10);

        assert!(matches!(feed.next().await, Some(FeedEvent::Snapshot(_))));
        temp.append_lines(&["more"]).unwrap();
        broadcaster.publish(&Delta {
            lines: vec!["more".to_string()],
            offset: temp.len(),
        });
        broadcaster.close_all(CloseReason::Shutdown);

        assert_eq!(feed.next().await, Some(FeedEvent::Line("more".to_string())));
        assert_eq!(feed.next().await, Some(FeedEvent::Closed(CloseReason::Shutdown)));
        assert_eq!(feed.next().await, None);
    }

    #[tokio::test]
    async fn test_feed_disconnect() {
        let temp = TempLogFile::with_lines(&["only"]).unwrap();
        let broadcaster = Broadcaster::new(16);
        broadcaster.establish(temp.len());
        let mut feed = feed_for(&temp, &broadcaster, 10);

        assert!(matches!(feed.next().await, Some(FeedEvent::Snapshot(_))));
        feed.disconnect();

        assert_eq!(
            feed.next().await,
            Some(FeedEvent::Closed(CloseReason::Disconnected))
        );
        assert_eq!(feed.next().await, None);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_feed_releases_subscriber() {
        let temp = TempLogFile::with_lines(&["only"]).unwrap();
        let broadcaster = Broadcaster::new(16);
        broadcaster.establish(temp.len());
        let mut feed = feed_for(&temp, &broadcaster, 10);

        assert!(matches!(feed.next().await, Some(FeedEvent::Snapshot(_))));
        assert_eq!(broadcaster.subscriber_count(), 1);
        drop(feed);

        for _ in 0..100 {
            if broadcaster.subscriber_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("dropped feed should release its mailbox");
    }

    #[tokio::test]
    async fn test_independent_feeds() {
        let temp = TempLogFile::with_lines(&["a"]).unwrap();
        let broadcaster = Broadcaster::new(16);
        broadcaster.establish(temp.len());
        let mut first = feed_for(&temp, &broadcaster, 10);
        let mut second = feed_for(&temp, &broadcaster, 10);

        assert!(matches!(first.next().await, Some(FeedEvent::Snapshot(_))));
        assert!(matches!(second.next().await, Some(FeedEvent::Snapshot(_))));

        first.disconnect();
        assert_eq!(
            first.next().await,
            Some(FeedEvent::Closed(CloseReason::Disconnected))
        );

        temp.append_lines(&["b"]).unwrap();
        broadcaster.publish(&Delta {
            lines: vec!["b".to_string()],
            offset: temp.len(),
        });
        assert_eq!(second.next().await, Some(FeedEvent::Line("b".to_string())));
    }
}
