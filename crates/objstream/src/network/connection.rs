//! A live TCP connection as seen by the object stream.
//!
//! The socket is split into a read half and a write half, each behind its own
//! async mutex, so one reader and one writer can use the connection at the
//! same time while concurrent writers are serialized frame by frame.
//!
//! A connection is *retired* when the supervisor replaces it or the stream is
//! closed. Retirement wakes any I/O still waiting on the old socket, which
//! then fails with `ConnectionAborted`, and releases both halves so the file
//! descriptor is closed right away.

use crate::config::DeadlinePolicy;
use crate::shutdown::ShutdownSignal;
use bytes::BytesMut;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// One dialed socket plus the state needed to use and retire it.
#[derive(Debug)]
pub struct Connection {
    generation: u64,
    peer: SocketAddr,
    deadline: DeadlinePolicy,
    established: Instant,
    /// `None` once the connection is retired.
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    retired: ShutdownSignal,
}

impl Connection {
    pub(crate) fn new(
        stream: TcpStream,
        generation: u64,
        deadline: DeadlinePolicy,
    ) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            generation,
            peer,
            deadline,
            established: Instant::now(),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            retired: ShutdownSignal::new(),
        })
    }

    /// Sequence number of this connection; grows with every reconnect.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_retired(&self) -> bool {
        self.retired.is_triggered()
    }

    /// Read whatever is available into `buf`.
    ///
    /// Returns the number of bytes read; zero means the peer closed the
    /// connection. Cancel safe: if the future is dropped, no bytes are lost.
    pub async fn read_into(&self, buf: &mut BytesMut) -> io::Result<usize> {
        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or_else(retired_error)?;
        self.guarded(reader.read_buf(buf)).await
    }

    /// Write the whole frame and flush.
    ///
    /// Short writes are continued from the last offset; a write that accepts
    /// no bytes at all fails with `WriteZero`.
    pub async fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or_else(retired_error)?;
        self.guarded(async {
            let mut offset = 0;
            while offset < frame.len() {
                let n = writer.write(&frame[offset..]).await?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "connection accepted zero bytes",
                    ));
                }
                offset += n;
            }
            writer.flush().await
        })
        .await
    }

    /// Retire the connection and close the socket.
    ///
    /// Pending I/O wakes up with `ConnectionAborted` and gives up its lock,
    /// after which both halves are taken and dropped. Later operations fail
    /// without touching the socket.
    pub async fn shutdown(&self) {
        if !self.retired.trigger() {
            return;
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown of connection #{} to {}: {}", self.generation, self.peer, e);
            }
        }
        // Dropping the last half closes the file descriptor.
        drop(self.reader.lock().await.take());
    }

    /// Instant by which the next operation must finish, if any.
    fn op_deadline(&self) -> Option<Instant> {
        match self.deadline {
            DeadlinePolicy::None => None,
            DeadlinePolicy::Absolute(lifetime) => Some(self.established + lifetime),
            DeadlinePolicy::PerOperation(timeout) => Some(Instant::now() + timeout),
        }
    }

    /// Run an I/O future under the deadline policy, aborting on retirement.
    async fn guarded<T>(&self, op: impl Future<Output = io::Result<T>>) -> io::Result<T> {
        if self.retired.is_triggered() {
            return Err(retired_error());
        }

        let deadline = self.op_deadline();
        if deadline.is_some_and(|at| at <= Instant::now()) {
            return Err(deadline_error());
        }
        let timed = async {
            match deadline {
                Some(at) => tokio::time::timeout_at(at, op)
                    .await
                    .map_err(|_| deadline_error())?,
                None => op.await,
            }
        };

        tokio::select! {
            result = timed => result,
            _ = self.retired.wait() => Err(retired_error()),
        }
    }
}

fn deadline_error() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "connection deadline exceeded")
}

fn retired_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection was replaced or closed")
}
