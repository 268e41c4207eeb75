//! State shared between the public stream handle and its background tasks.

use super::supervisor::ReconnectTrigger;
use crate::config::StreamConfig;
use crate::network::{Connection, Connector};
use crate::protocol::{BufferPool, FrameBuffer};
use crate::shutdown::ShutdownSignal;
use crate::{Result, StreamError};
use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::debug;

/// Snapshot of stream counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Generation of the current connection (1 for the initial dial).
    pub generation: u64,
    /// Reconnects that produced a new connection.
    pub reconnects: u64,
    /// Reconnects abandoned after exhausting dial attempts.
    pub failed_reconnects: u64,
    /// Dial attempts made by the supervisor across all reconnects.
    pub reconnect_dial_attempts: u64,
    pub heartbeats_sent: u64,
    pub heartbeat_failures: u64,
    /// Whether a reconnect is in flight right now.
    pub reconnecting: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub reconnects: AtomicU64,
    pub failed_reconnects: AtomicU64,
    pub reconnect_dial_attempts: AtomicU64,
    pub heartbeats_sent: AtomicU64,
    pub heartbeat_failures: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) struct Shared {
    pub config: StreamConfig,
    pub connector: Connector,
    pub pool: Arc<BufferPool>,
    /// Exclusive read lock; also owns the pending frame buffer.
    pub reader: Mutex<FrameBuffer>,
    pub trigger: ReconnectTrigger,
    pub termination: ShutdownSignal,
    pub counters: Counters,
    pub next_request_id: AtomicU64,
    current: RwLock<Arc<Connection>>,
    closed: AtomicBool,
}

impl Shared {
    pub fn new(
        config: StreamConfig,
        connector: Connector,
        conn: Connection,
        trigger: ReconnectTrigger,
    ) -> Self {
        let pool = Arc::new(BufferPool::new());
        let pending = FrameBuffer::new(config.framing, config.max_frame_size, pool.clone());
        Self {
            config,
            connector,
            pool,
            reader: Mutex::new(pending),
            trigger,
            termination: ShutdownSignal::new(),
            counters: Counters::default(),
            next_request_id: AtomicU64::new(crate::protocol::HEARTBEAT_ID + 1),
            current: RwLock::new(Arc::new(conn)),
            closed: AtomicBool::new(false),
        }
    }

    /// The connection readers and writers should use right now.
    pub fn current(&self) -> Arc<Connection> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Install a freshly dialed connection and return the one it replaces.
    ///
    /// Refuses (returning the new connection) once the stream is closed, so a
    /// reconnect racing with `close()` never resurrects the socket.
    pub fn swap(&self, conn: Connection) -> std::result::Result<Arc<Connection>, Connection> {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.is_closed() {
            return Err(conn);
        }
        Ok(std::mem::replace(&mut *current, Arc::new(conn)))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flip the closed flag. Returns `false` if it was already set.
    pub fn mark_closed(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(StreamError::Closed)
        } else {
            Ok(())
        }
    }

    /// Write one encoded frame on the current connection.
    pub async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let conn = self.current();
        conn.write_frame(frame)
            .await
            .map_err(|e| self.io_failure(&conn, e))
    }

    /// Read the next frame body from the current connection.
    ///
    /// The caller must hold the read lock (`pending` comes from it). One call
    /// sticks to one connection; bytes pending from an older connection are
    /// dropped first.
    pub async fn recv_frame(&self, pending: &mut FrameBuffer) -> Result<Bytes> {
        self.ensure_open()?;
        let conn = self.current();
        pending.attach(conn.generation());

        loop {
            if let Some(frame) = pending.next_frame()? {
                return Ok(frame);
            }
            match conn.read_into(pending.read_buf()).await {
                Ok(0) => {
                    let eof = io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    );
                    return Err(self.io_failure(&conn, eof));
                }
                Ok(_) => {}
                Err(e) => return Err(self.io_failure(&conn, e)),
            }
        }
    }

    /// Convert an I/O failure into a caller-facing error, reporting it to the
    /// supervisor when it means the connection is gone.
    pub fn io_failure(&self, conn: &Connection, err: io::Error) -> StreamError {
        if self.is_closed() {
            return StreamError::Closed;
        }
        let err = StreamError::from(err);
        if err.is_connection_level() {
            debug!(
                "Connection #{} to {} failed: {}",
                conn.generation(),
                conn.peer_addr(),
                err
            );
            self.trigger.report(conn.generation());
        }
        err
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            generation: self.current().generation(),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
            failed_reconnects: self.counters.failed_reconnects.load(Ordering::Relaxed),
            reconnect_dial_attempts: self.counters.reconnect_dial_attempts.load(Ordering::Relaxed),
            heartbeats_sent: self.counters.heartbeats_sent.load(Ordering::Relaxed),
            heartbeat_failures: self.counters.heartbeat_failures.load(Ordering::Relaxed),
            reconnecting: self.trigger.is_reconnecting(),
        }
    }
}
