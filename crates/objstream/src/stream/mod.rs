//! The self-healing object stream.
//!
//! An [`ObjectStream`] owns one logical connection to a remote service. It
//! writes and reads JSON objects as delimited frames, and keeps the
//! connection alive in the background:
//!
//! - **Supervisor**: one task that reconnects after connection-level
//!   failures, at most one attempt at a time
//! - **Heartbeat**: one task that writes a liveness frame on a fixed period
//!
//! # Thread Safety
//!
//! All methods take `&self`; share the stream with `Arc`. Writers are
//! serialized per frame by the connection's write lock, readers by the
//! stream's read lock, so frames never interleave on the wire. The current
//! connection is swapped under a lock that is held only for the swap.

mod heartbeat;
mod shared;
mod supervisor;

pub use shared::StreamStats;

use crate::config::StreamConfig;
use crate::network::Connector;
use crate::protocol::{decode_frame, encode_frame, PoolStats, RpcRequest, RpcResponse};
use crate::{Result, StreamError};
use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::Shared;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use supervisor::ReconnectTrigger;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Initial encode buffer size; the pool rounds this to its size class.
const ENCODE_BUFFER_HINT: usize = 4096;

/// A JSON object stream over one self-healing TCP connection.
pub struct ObjectStream {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ObjectStream {
    /// Dial the configured target and start the background tasks.
    ///
    /// Fails with [`StreamError::Dial`] if every dial attempt fails, or
    /// [`StreamError::Config`] if the configuration is invalid.
    pub async fn connect(config: StreamConfig) -> Result<Self> {
        config.validate()?;

        let mut heartbeat_frame = BytesMut::new();
        encode_frame(&config.heartbeat_payload, config.framing, &mut heartbeat_frame)?;

        let connector = Connector::new(&config);
        let (result, _) = connector.dial(1).await;
        let conn = result?;

        let (trigger, failures) = ReconnectTrigger::new();
        let heartbeat_interval = config.heartbeat_interval;
        let shared = Arc::new(Shared::new(config, connector, conn, trigger));

        let mut tasks = vec![tokio::spawn(supervisor::run(shared.clone(), failures))];
        if let Some(period) = heartbeat_interval {
            tasks.push(tokio::spawn(heartbeat::run(
                shared.clone(),
                period,
                heartbeat_frame.freeze(),
            )));
        }

        Ok(Self {
            shared,
            tasks: Mutex::new(tasks),
        })
    }

    /// Connect to `host:port` with default settings.
    pub async fn connect_to(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::connect(StreamConfig::new(host, port)).await
    }

    /// Serialize `value` and write it as one frame.
    ///
    /// Returns once the whole frame is flushed. On a connection-level
    /// failure the error is returned and a reconnect is started in the
    /// background; the write itself is not retried.
    pub async fn write_object<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.shared.ensure_open()?;

        let mut buf = self.shared.pool.acquire(ENCODE_BUFFER_HINT);
        let result = self.encode_and_send(value, &mut buf).await;
        self.shared.pool.release(buf);
        result
    }

    async fn encode_and_send<T: Serialize + ?Sized>(
        &self,
        value: &T,
        buf: &mut BytesMut,
    ) -> Result<()> {
        encode_frame(value, self.shared.config.framing, buf)?;

        let size = buf.len() - 1;
        if size > self.shared.config.max_frame_size {
            return Err(StreamError::FrameTooLarge {
                size,
                max: self.shared.config.max_frame_size,
            });
        }

        self.shared.send_frame(buf).await
    }

    /// Wait for the next frame and deserialize it into `T`.
    ///
    /// A frame that fails to decode is consumed; the stream stays usable.
    pub async fn read_object<T: DeserializeOwned>(&self) -> Result<T> {
        let frame = self.read_frame().await?;
        decode_frame(&frame)
    }

    /// Wait for the next frame as an untyped JSON value.
    pub async fn read_value(&self) -> Result<serde_json::Value> {
        self.read_object().await
    }

    async fn read_frame(&self) -> Result<Bytes> {
        let mut pending = self.shared.reader.lock().await;
        self.shared.recv_frame(&mut pending).await
    }

    /// Send a JSON-RPC request and wait for the response with the same id.
    ///
    /// Frames that are not the awaited response (heartbeat answers,
    /// unsolicited notifications) are skipped. The read lock is held for the
    /// whole exchange, so concurrent calls are answered in order rather than
    /// stealing each other's responses.
    pub async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<RpcResponse> {
        let id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, params, id);

        let mut pending = self.shared.reader.lock().await;
        self.write_object(&request).await?;

        loop {
            let frame = self.shared.recv_frame(&mut pending).await?;
            match decode_frame::<RpcResponse>(&frame) {
                Ok(response) if response.answers(id) => return Ok(response),
                Ok(other) => debug!("Skipping response {:?} while waiting for {}", other.id, id),
                Err(e) => debug!("Skipping non-response frame while waiting for {}: {}", id, e),
            }
        }
    }

    /// Close the connection and stop the background tasks.
    ///
    /// The second and later calls return [`StreamError::AlreadyClosed`].
    pub async fn close(&self) -> Result<()> {
        if !self.shared.mark_closed() {
            return Err(StreamError::AlreadyClosed);
        }

        let conn = self.shared.current();
        conn.shutdown().await;
        self.shared.termination.trigger();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|p| p.into_inner()));
        for task in tasks {
            let _ = task.await;
        }

        info!("Stream to {} closed", self.shared.connector.address());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Address of the peer behind the current connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.current().peer_addr()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> StreamStats {
        self.shared.stats()
    }

    /// Usage counters of the stream's buffer pool.
    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }
}

impl Drop for ObjectStream {
    fn drop(&mut self) {
        self.shared.termination.trigger();
        let tasks = self.tasks.get_mut().unwrap_or_else(|p| p.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream")
            .field("address", &self.shared.connector.address())
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}
