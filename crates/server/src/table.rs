//! Connection table
//!
//! Process-wide map from connection id to a live outbound TCP connection.
//! Handlers take an `Arc` out of the map and release the map lock before any
//! socket I/O, so a parked long-poll never blocks other ids.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use httpbridge_core::{ConnId, TargetAddr};

/// One tunneled connection: the outbound socket split per direction.
///
/// The reader half serializes concurrent GETs for an id and the writer half
/// serializes PUTs; one GET and one PUT may overlap, which is the whole
/// point of the two pump directions.
pub struct TunnelConn {
    id: ConnId,
    target: TargetAddr,
    opened_at: Instant,
    reader: AsyncMutex<OwnedReadHalf>,
    writer: AsyncMutex<OwnedWriteHalf>,
    /// Fired on removal; wakes a GET parked in its poll window.
    closed: CancellationToken,
    last_activity: Mutex<Instant>,
}

impl TunnelConn {
    pub fn new(id: ConnId, target: TargetAddr, stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        let now = Instant::now();
        Self {
            id,
            target,
            opened_at: now,
            reader: AsyncMutex::new(reader),
            writer: AsyncMutex::new(writer),
            closed: CancellationToken::new(),
            last_activity: Mutex::new(now),
        }
    }

    pub fn id(&self) -> &ConnId {
        &self.id
    }

    pub fn target(&self) -> &TargetAddr {
        &self.target
    }

    /// Age of the connection, for diagnostics.
    pub fn opened_for(&self) -> Duration {
        self.opened_at.elapsed()
    }

    pub(crate) fn reader(&self) -> &AsyncMutex<OwnedReadHalf> {
        &self.reader
    }

    pub(crate) fn writer(&self) -> &AsyncMutex<OwnedWriteHalf> {
        &self.writer
    }

    pub(crate) fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    /// Record handler activity so the stale sweeper leaves this entry alone.
    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }
}

/// Map from connection id to live tunnel.
///
/// The only shared mutable state on the server. Lookups and mutations are
/// serialized by the inner mutex; long-poll suspensions happen outside it.
#[derive(Default)]
pub struct ConnectionTable {
    entries: Mutex<HashMap<ConnId, Arc<TunnelConn>>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its id.
    ///
    /// Returns `false` without touching the table if the id is already
    /// live; an open must never silently replace an existing tunnel.
    pub fn insert(&self, conn: Arc<TunnelConn>) -> bool {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(conn.id()) {
            return false;
        }
        entries.insert(conn.id().clone(), conn);
        true
    }

    pub fn get(&self, id: &ConnId) -> Option<Arc<TunnelConn>> {
        self.entries.lock().unwrap().get(id).cloned()
    }

    /// Drop the entry for `id` and wake anything parked on it. Idempotent.
    pub fn remove(&self, id: &ConnId) -> bool {
        let removed = self.entries.lock().unwrap().remove(id);
        match removed {
            Some(conn) => {
                conn.closed.cancel();
                debug!(
                    "tunnel {} removed after {:?}",
                    id.short(),
                    conn.opened_for()
                );
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Close every entry (server shutdown). Sockets are released as the last
    /// handler reference to each connection drops.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.entries.lock().unwrap().drain().collect();
        for (_, conn) in &drained {
            conn.closed.cancel();
        }
        if !drained.is_empty() {
            debug!("closed {} tunnel(s) on shutdown", drained.len());
        }
    }

    /// Drop entries with no handler activity for `max_idle`.
    ///
    /// A connected client long-polls continuously, so its entry stays warm;
    /// only tunnels whose client vanished without a close end up here.
    pub fn sweep_stale(&self, max_idle: Duration) -> usize {
        let stale: Vec<_> = {
            let entries = self.entries.lock().unwrap();
            entries
                .iter()
                .filter(|(_, conn)| conn.idle_for() > max_idle)
                .map(|(id, _)| id.clone())
                .collect()
        };
        let mut swept = 0;
        for id in &stale {
            if self.remove(id) {
                swept += 1;
            }
        }
        swept
    }
}
