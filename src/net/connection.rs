//! Live-connection accounting.
//!
//! HTTP connections, proxied connections and P2P links all carry a
//! [`ConnectionGuard`]; dropping it is the only way a connection leaves the
//! count, so a panicking task cannot leak an entry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::observability::metrics;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection number, shown as `conn-<n>` in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug)]
struct Counter {
    live: AtomicU64,
    drained: Notify,
}

/// Counts open connections for one role (`backend`, `proxy`, `chat`, `p2p`).
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    role: &'static str,
    counter: Arc<Counter>,
}

impl ConnectionTracker {
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            counter: Arc::new(Counter {
                live: AtomicU64::new(0),
                drained: Notify::new(),
            }),
        }
    }

    pub fn track(&self) -> ConnectionGuard {
        self.counter.live.fetch_add(1, Ordering::SeqCst);
        metrics::connection_opened(self.role);
        ConnectionGuard {
            role: self.role,
            counter: Arc::clone(&self.counter),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.counter.live.load(Ordering::SeqCst)
    }

    /// Wait for the count to reach zero. Returns false if `deadline`
    /// passed first.
    pub async fn wait_idle(&self, deadline: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.counter.drained.notified();
                if self.active_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(deadline, drained).await.is_ok()
    }
}

/// Membership of one connection in a [`ConnectionTracker`].
#[derive(Debug)]
pub struct ConnectionGuard {
    role: &'static str,
    counter: Arc<Counter>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.counter.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.counter.drained.notify_waiters();
        }
        metrics::connection_closed(self.role);
        tracing::trace!(role = self.role, connection_id = %self.id, "Connection released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_and_displayed() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("conn-"));
    }

    #[test]
    fn guards_move_the_count() {
        let tracker = ConnectionTracker::new("test");
        let first = tracker.track();
        let second = tracker.clone().track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(first.id(), second.id());
        drop(first);
        drop(second);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn wait_idle_wakes_on_last_release() {
        let tracker = ConnectionTracker::new("test");
        assert!(tracker.wait_idle(Duration::from_millis(10)).await);

        let guard = tracker.track();
        assert!(!tracker.wait_idle(Duration::from_millis(50)).await);

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });
        assert!(tracker.wait_idle(Duration::from_secs(1)).await);
        release.await.unwrap();
    }
}
