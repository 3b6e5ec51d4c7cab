//! Per-connection context.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use atelier_protocol::{ProjectId, ServerEvent, UserId};

use crate::room::Outbox;

/// Process-unique id of one socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Fixed-window event counter.
#[derive(Clone, Debug)]
pub struct RateWindow {
    max_events: u32,
    window: Duration,
    window_start: Instant,
    count: u32,
}

impl RateWindow {
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self {
            max_events,
            window,
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Count an event at `now`; `false` if the budget is exhausted.
    pub fn allow(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.max_events
    }
}

/// Identity and plumbing attached to an admitted connection.
pub struct ConnectionContext {
    pub id: ConnectionId,
    pub user: UserId,
    pub project: ProjectId,
    pub connected_at: Instant,
    pub(crate) outbox: Outbox,
    pub(crate) rate: RateWindow,
}

impl ConnectionContext {
    pub fn new(user: UserId, project: ProjectId, outbox: Outbox, rate: RateWindow) -> Self {
        Self {
            id: ConnectionId::next(),
            user,
            project,
            connected_at: Instant::now(),
            outbox,
            rate,
        }
    }

    /// Send straight to this connection.
    pub fn reply(&self, event: ServerEvent) {
        if self.outbox.send(event).is_err() {
            tracing::debug!(connection = %self.id, "Reply dropped; writer gone");
        }
    }
}
