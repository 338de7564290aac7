//! Per-subscriber bounded queue.
//!
//! The broadcaster pushes without ever waiting. Only lines count against the
//! capacity: when a mailbox is full its oldest line is dropped and replaced by
//! a [`TailEvent::Gap`] at the same position, merged with any gap already there.
//! Reset markers are never dropped, so a lagging reader can still tell a
//! truncated file from lost lines.

use crate::broadcast::Broadcaster;
use crate::error::CloseReason;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Identifies one registered mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(crate) u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// One unit delivered through a mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    Line(String),
    /// The file shrank; lines that follow start a new epoch.
    Reset,
    /// `missed` lines were dropped here because the mailbox overflowed.
    Gap { missed: u64 },
}

/// What a push did to a full mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Overflow {
    Queued,
    /// First dropped line since the reader last saw a gap.
    Started,
    /// The mailbox was already lagging.
    Continued,
}

struct MailboxState {
    queue: VecDeque<TailEvent>,
    /// Buffered `Line` entries; markers do not count against the capacity.
    lines: usize,
    lagging: bool,
    closed: Option<CloseReason>,
}

impl MailboxState {
    /// Drops the oldest line and leaves a gap in its place.
    fn evict_oldest_line(&mut self) {
        let Some(index) = self
            .queue
            .iter()
            .position(|event| matches!(event, TailEvent::Line(_)))
        else {
            return;
        };
        self.queue.remove(index);
        self.lines -= 1;

        match index.checked_sub(1).and_then(|i| self.queue.get_mut(i)) {
            Some(TailEvent::Gap { missed }) => *missed += 1,
            _ => self.queue.insert(index, TailEvent::Gap { missed: 1 }),
        }
        self.compact_head();
    }

    /// Folds the markers in front of the first line into at most
    /// `Gap, Reset, Gap`. Earlier resets are implied by the last one, so gaps
    /// before it merge.
    fn compact_head(&mut self) {
        let mut before = 0u64;
        let mut reset = false;
        let mut after = 0u64;

        while let Some(front) = self.queue.front() {
            match front {
                TailEvent::Line(_) => break,
                TailEvent::Gap { missed } if reset => after += missed,
                TailEvent::Gap { missed } => before += missed,
                TailEvent::Reset => {
                    before += std::mem::take(&mut after);
                    reset = true;
                }
            }
            self.queue.pop_front();
        }

        if after > 0 {
            self.queue.push_front(TailEvent::Gap { missed: after });
        }
        if reset {
            self.queue.push_front(TailEvent::Reset);
        }
        if before > 0 {
            self.queue.push_front(TailEvent::Gap { missed: before });
        }
    }
}

/// The half of a mailbox the broadcaster keeps in its registry.
pub(crate) struct MailboxShared {
    state: Mutex<MailboxState>,
    notify: Notify,
    capacity: usize,
}

impl MailboxShared {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(MailboxState {
                queue: VecDeque::with_capacity(capacity.min(64)),
                lines: 0,
                lagging: false,
                closed: None,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `event`, dropping the oldest line if full.
    pub(crate) fn push(&self, event: TailEvent) -> Overflow {
        let overflow = {
            let mut state = self.lock();
            if state.closed.is_some() {
                return Overflow::Queued;
            }

            let mut overflow = Overflow::Queued;
            if matches!(event, TailEvent::Line(_)) {
                if state.lines >= self.capacity {
                    state.evict_oldest_line();
                    overflow = if state.lagging {
                        Overflow::Continued
                    } else {
                        Overflow::Started
                    };
                    state.lagging = true;
                }
                state.lines += 1;
                state.queue.push_back(event);
            } else {
                state.queue.push_back(event);
                if state.lines == 0 {
                    state.compact_head();
                }
            }
            overflow
        };
        self.notify.notify_one();
        overflow
    }

    /// Mark closed. Buffered events stay readable; the first reason wins.
    pub(crate) fn close(&self, reason: CloseReason) {
        {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.closed = Some(reason);
            }
        }
        self.notify.notify_one();
    }

    fn take(&self) -> Option<Result<TailEvent, CloseReason>> {
        let mut state = self.lock();
        match state.queue.pop_front() {
            Some(event) => {
                match event {
                    TailEvent::Line(_) => state.lines -= 1,
                    TailEvent::Gap { .. } => state.lagging = false,
                    TailEvent::Reset => {}
                }
                Some(Ok(event))
            }
            None => state.closed.clone().map(Err),
        }
    }

    fn len(&self) -> usize {
        self.lock().queue.len()
    }
}

/// Receiving end handed to exactly one session.
///
/// Dropping it deregisters it from the broadcaster.
pub struct Mailbox {
    id: SubscriberId,
    join_offset: u64,
    shared: Arc<MailboxShared>,
    broadcaster: Broadcaster,
}

impl Mailbox {
    pub(crate) fn new(
        id: SubscriberId,
        join_offset: u64,
        shared: Arc<MailboxShared>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            id,
            join_offset,
            shared,
            broadcaster,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Offset of the last delta published before this mailbox was registered.
    /// Every line after it arrives through the mailbox.
    pub fn join_offset(&self) -> u64 {
        self.join_offset
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next event, or the close reason once closed and drained.
    ///
    /// Cancel safe: nothing is consumed unless the future completes.
    pub async fn recv(&mut self) -> Result<TailEvent, CloseReason> {
        loop {
            if let Some(next) = self.shared.take() {
                return next;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Non-waiting variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Result<TailEvent, CloseReason>> {
        self.shared.take()
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        self.broadcaster.leave(self.id);
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("id", &self.id)
            .field("join_offset", &self.join_offset)
            .finish()
    }
}
