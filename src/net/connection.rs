//! Connection lifecycle tracking and relaying.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count active relays per frontend
//! - Relay bytes between two streams until either side closes or the
//!   frontend is cancelled

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Relaxed ordering is enough: IDs only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
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

/// Counts the active connections of one frontend.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. The guard decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Tracks one connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Outcome of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relayed {
    /// Both directions finished; bytes client→upstream and upstream→client.
    Completed { to_upstream: u64, to_client: u64 },
    /// The frontend was stopped mid-relay.
    Cancelled,
}

/// Copy bytes both ways until EOF on both sides, an error, or cancellation.
pub async fn relay<A, B>(client: &mut A, upstream: &mut B, cancel: &CancellationToken) -> io::Result<Relayed>
where
    A: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    tokio::select! {
        result = copy_bidirectional(client, upstream) => {
            let (to_upstream, to_client) = result?;
            Ok(Relayed::Completed { to_upstream, to_client })
        }
        _ = cancel.cancelled() => Ok(Relayed::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        let guard2 = tracker.clone().track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn relay_copies_both_directions() {
        let (mut client, mut client_side) = tokio::io::duplex(64);
        let (mut upstream, mut upstream_side) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(async move { relay(&mut client_side, &mut upstream_side, &cancel).await });

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        drop(client);
        drop(upstream);
        let relayed = task.await.unwrap().unwrap();
        assert_eq!(relayed, Relayed::Completed { to_upstream: 4, to_client: 5 });
    }

    #[tokio::test]
    async fn relay_stops_on_cancel() {
        let (_client, mut client_side) = tokio::io::duplex(64);
        let (_upstream, mut upstream_side) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let relayed = relay(&mut client_side, &mut upstream_side, &cancel).await.unwrap();
        assert_eq!(relayed, Relayed::Cancelled);
    }
}
