//! Fan-out of tail events to every registered mailbox.
//!
//! ```text
//!   publish(&Delta)
//!        │           (one registry lock per publish)
//!        ├──────► [mailbox S1] ─► session S1 ─► sink
//!        ├──────► [mailbox S2] ─► session S2 ─► sink
//!        └──────► [mailbox SN] ─► session SN ─► sink
//! ```
//!
//! Join, leave, publish, reset and close all run under the same registry lock,
//! so a subscriber either sees a whole delta or none of it, and the offset it
//! joins at always matches the first line it will receive.
//!
//! Publishing never waits on a mailbox: a full one drops its oldest line and
//! its session later reports a gap. Other subscribers are unaffected.

use crate::error::CloseReason;
use crate::mailbox::{Mailbox, MailboxShared, Overflow, SubscriberId, TailEvent};
use crate::reader::{Delta, Snapshot};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

struct Registry {
    mailboxes: BTreeMap<SubscriberId, Arc<MailboxShared>>,
    next_id: u64,
    /// Offset right after the last line handed to mailboxes.
    offset: u64,
    closed: Option<CloseReason>,
}

/// Registry of live mailboxes for one watched file.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Mutex<Registry>>,
    capacity: usize,
}

impl Broadcaster {
    /// Creates a broadcaster whose mailboxes hold up to `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                mailboxes: BTreeMap::new(),
                next_id: 0,
                offset: 0,
                closed: None,
            })),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new mailbox.
    ///
    /// After a terminal [`close_all`](Self::close_all) the returned mailbox is
    /// already closed with the same reason.
    pub fn join(&self) -> Mailbox {
        let shared = Arc::new(MailboxShared::new(self.capacity));

        let mut registry = self.lock();
        let id = SubscriberId(registry.next_id);
        registry.next_id += 1;
        let join_offset = registry.offset;

        match &registry.closed {
            Some(reason) => shared.close(reason.clone()),
            None => {
                registry.mailboxes.insert(id, Arc::clone(&shared));
            }
        }
        drop(registry);

        Mailbox::new(id, join_offset, shared, self.clone())
    }

    /// Deregisters a mailbox. Returns false if it was already gone.
    pub fn leave(&self, id: SubscriberId) -> bool {
        let removed = self.lock().mailboxes.remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, "Mailbox deregistered");
        }
        removed
    }

    /// Delivers each line of `delta` to every mailbox, in order.
    pub fn publish(&self, delta: &Delta) {
        let mut registry = self.lock();
        if registry.closed.is_some() {
            return;
        }
        registry.offset = delta.offset;

        for (id, mailbox) in &registry.mailboxes {
            let events = delta.lines.iter().map(|line| TailEvent::Line(line.clone()));
            deliver(*id, mailbox, events);
        }
    }

    /// Delivers a reset marker followed by the fresh snapshot lines.
    pub fn reset(&self, snapshot: &Snapshot) {
        let mut registry = self.lock();
        if registry.closed.is_some() {
            return;
        }
        registry.offset = snapshot.offset;

        for (id, mailbox) in &registry.mailboxes {
            let lines = snapshot.lines.iter().map(|line| TailEvent::Line(line.clone()));
            deliver(*id, mailbox, std::iter::once(TailEvent::Reset).chain(lines));
        }
    }

    /// Terminal event: closes every mailbox and refuses new ones.
    pub fn close_all(&self, reason: CloseReason) {
        let mut registry = self.lock();
        if registry.closed.is_some() {
            return;
        }
        let count = registry.mailboxes.len();
        for mailbox in registry.mailboxes.values() {
            mailbox.close(reason.clone());
        }
        registry.mailboxes.clear();
        registry.closed = Some(reason.clone());
        drop(registry);

        debug!(subscribers = count, %reason, "Closed all mailboxes");
    }

    /// Sets the offset reported to subscribers that join before the first publish.
    pub(crate) fn establish(&self, offset: u64) {
        self.lock().offset = offset;
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().mailboxes.len()
    }

    /// Offset of the last published line.
    pub fn offset(&self) -> u64 {
        self.lock().offset
    }

    pub fn closed_reason(&self) -> Option<CloseReason> {
        self.lock().closed.clone()
    }
}

/// Pushes `events` into one mailbox. Warns once when it starts lagging; further
/// drops in the same episode are only counted at debug level.
fn deliver(id: SubscriberId, mailbox: &MailboxShared, events: impl Iterator<Item = TailEvent>) {
    let mut started = false;
    let mut dropped = 0usize;
    for event in events {
        match mailbox.push(event) {
            Overflow::Queued => {}
            Overflow::Started => {
                started = true;
                dropped += 1;
            }
            Overflow::Continued => dropped += 1,
        }
    }

    if started {
        warn!(subscriber = %id, dropped, "Subscriber lagging, dropping oldest lines");
    } else if dropped > 0 {
        debug!(subscriber = %id, dropped, "Subscriber still lagging");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(lines: &[&str], offset: u64) -> Delta {
        Delta {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            offset,
        }
    }

    fn drain(mailbox: &mut Mailbox) -> Vec<TailEvent> {
        let mut events = Vec::new();
        while let Some(Ok(event)) = mailbox.try_recv() {
            events.push(event);
        }
        events
    }

    fn lines(items: &[&str]) -> Vec<TailEvent> {
        items.iter().map(|l| TailEvent::Line(l.to_string())).collect()
    }

    #[test]
    fn test_publish_reaches_every_mailbox() {
        let broadcaster = Broadcaster::new(16);
        let mut first = broadcaster.join();
        let mut second = broadcaster.join();

        broadcaster.publish(&delta(&["a", "b"], 4));

        assert_eq!(drain(&mut first), lines(&["a", "b"]));
        assert_eq!(drain(&mut second), lines(&["a", "b"]));
        assert_eq!(broadcaster.offset(), 4);
    }

    #[test]
    fn test_join_offset_tracks_publishes() {
        let broadcaster = Broadcaster::new(16);
        broadcaster.establish(10);
        let early = broadcaster.join();

        broadcaster.publish(&delta(&["x"], 12));
        let mut late = broadcaster.join();

        assert_eq!(early.join_offset(), 10);
        assert_eq!(late.join_offset(), 12);
        assert!(drain(&mut late).is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let broadcaster = Broadcaster::new(4);
        let a = broadcaster.join();
        let b = broadcaster.join();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_leave_is_idempotent() {
        let broadcaster = Broadcaster::new(4);
        let mailbox = broadcaster.join();
        let id = mailbox.id();

        assert!(broadcaster.leave(id));
        assert!(!broadcaster.leave(id));
        drop(mailbox);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_left_mailbox_receives_nothing() {
        let broadcaster = Broadcaster::new(4);
        let mut mailbox = broadcaster.join();
        broadcaster.leave(mailbox.id());

        broadcaster.publish(&delta(&["after"], 6));

        assert!(mailbox.try_recv().is_none());
    }

    #[test]
    fn test_overflow_is_isolated_per_mailbox() {
        let broadcaster = Broadcaster::new(3);
        let mut slow = broadcaster.join();
        let mut fast = broadcaster.join();

        let mut expected = Vec::new();
        for i in 0..10 {
            let line = format!("line {}", i);
            broadcaster.publish(&delta(&[line.as_str()], i + 1));
            expected.push(TailEvent::Line(line));
            assert_eq!(fast.try_recv(), Some(Ok(expected.last().unwrap().clone())));
        }

        let slow_events = drain(&mut slow);
        assert_eq!(slow_events[0], TailEvent::Gap { missed: 7 });
        assert_eq!(&slow_events[1..], &expected[7..]);
    }

    #[test]
    fn test_reset_sends_marker_then_snapshot() {
        let broadcaster = Broadcaster::new(16);
        broadcaster.establish(100);
        let mut mailbox = broadcaster.join();

        broadcaster.reset(&Snapshot {
            lines: vec!["fresh".to_string()],
            offset: 6,
        });

        assert_eq!(
            drain(&mut mailbox),
            vec![TailEvent::Reset, TailEvent::Line("fresh".to_string())]
        );
        assert_eq!(broadcaster.offset(), 6);
    }

    #[test]
    fn test_reset_marker_outlives_overflow() {
        let broadcaster = Broadcaster::new(4);
        let mut lagging = broadcaster.join();

        broadcaster.reset(&Snapshot {
            lines: vec!["r1".to_string(), "r2".to_string()],
            offset: 6,
        });
        for i in 0..4u64 {
            let line = format!("n{}", i);
            broadcaster.publish(&delta(&[line.as_str()], 9 + 3 * i));
        }

        let mut expected = vec![TailEvent::Reset, TailEvent::Gap { missed: 2 }];
        expected.extend(lines(&["n0", "n1", "n2", "n3"]));
        assert_eq!(drain(&mut lagging), expected);
    }

    #[test]
    fn test_reset_snapshot_larger_than_capacity() {
        let broadcaster = Broadcaster::new(2);
        let mut mailbox = broadcaster.join();

        broadcaster.reset(&Snapshot {
            lines: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            offset: 6,
        });

        let mut expected = vec![TailEvent::Reset, TailEvent::Gap { missed: 1 }];
        expected.extend(lines(&["b", "c"]));
        assert_eq!(drain(&mut mailbox), expected);
    }

    #[test]
    fn test_close_all_is_terminal() {
        let broadcaster = Broadcaster::new(16);
        let mut existing = broadcaster.join();
        broadcaster.publish(&delta(&["before"], 7));

        broadcaster.close_all(CloseReason::SourceLost("gone".to_string()));
        broadcaster.close_all(CloseReason::Shutdown);
        broadcaster.publish(&delta(&["after"], 13));

        assert_eq!(existing.try_recv(), Some(Ok(TailEvent::Line("before".to_string()))));
        assert_eq!(
            existing.try_recv(),
            Some(Err(CloseReason::SourceLost("gone".to_string())))
        );
        assert_eq!(broadcaster.subscriber_count(), 0);

        let mut late = broadcaster.join();
        assert_eq!(
            late.try_recv(),
            Some(Err(CloseReason::SourceLost("gone".to_string())))
        );
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_join_and_publish_never_tears() {
        let broadcaster = Broadcaster::new(10_000);
        let publisher = broadcaster.clone();

        let producer = tokio::spawn(async move {
            for i in 0..500u64 {
                publisher.publish(&Delta {
                    lines: vec![format!("{}a", i), format!("{}b", i)],
                    offset: i + 1,
                });
                tokio::task::yield_now().await;
            }
        });

        let mut joined = Vec::new();
        for _ in 0..20 {
            joined.push(broadcaster.join());
            tokio::task::yield_now().await;
        }
        producer.await.unwrap();

        for mut mailbox in joined {
            let events = drain(&mut mailbox);
            assert_eq!(events.len() % 2, 0, "deltas must arrive whole");

            let first = mailbox.join_offset();
            for (k, pair) in events.chunks(2).enumerate() {
                let i = first + k as u64;
                assert_eq!(pair[0], TailEvent::Line(format!("{}a", i)));
                assert_eq!(pair[1], TailEvent::Line(format!("{}b", i)));
            }
        }
    }
}
