//! TCP dialing with bounded retry.
//!
//! Each attempt resolves the target, tries every resolved address in turn and
//! gives up on the attempt after the dial timeout. Successful sockets get TCP
//! keepalive and `TCP_NODELAY` before they are handed to the stream.

use super::connection::Connection;
use super::retry::{retry_async, RetryConfig, RetryStats};
use crate::config::{DeadlinePolicy, StreamConfig};
use crate::{Result, StreamError};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, info};

/// Dials the configured target.
#[derive(Debug, Clone)]
pub struct Connector {
    address: String,
    dial_timeout: Duration,
    retry: RetryConfig,
    deadline: DeadlinePolicy,
}

impl Connector {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            address: config.address(),
            dial_timeout: config.dial_timeout,
            retry: config.retry_config(),
            deadline: config.deadline,
        }
    }

    /// The `host:port` this connector dials.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Dial with bounded retry and wrap the socket as connection `generation`.
    ///
    /// The retry stats are returned alongside the result so callers can see
    /// how many attempts a dial took, whether it succeeded or not.
    pub async fn dial(&self, generation: u64) -> (Result<Connection>, RetryStats) {
        let (result, stats) = retry_async(&self.retry, |attempt| async move {
            debug!("Dialing {} (attempt {})", self.address, attempt + 1);
            self.dial_once().await
        })
        .await;

        let result = result
            .and_then(|stream| Connection::new(stream, generation, self.deadline))
            .map_err(|source| StreamError::Dial {
                addr: self.address.clone(),
                attempts: stats.attempts,
                source,
            });

        if let Ok(conn) = &result {
            info!(
                "Connected to {} ({}) as connection #{}",
                self.address,
                conn.peer_addr(),
                generation
            );
        }

        (result, stats)
    }

    /// A single dial attempt bounded by the dial timeout.
    pub async fn dial_once(&self) -> io::Result<TcpStream> {
        tokio::time::timeout(self.dial_timeout, self.connect_any())
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("dial timed out after {:?}", self.dial_timeout),
                )
            })?
    }

    async fn connect_any(&self) -> io::Result<TcpStream> {
        let mut last_err = None;

        for addr in tokio::net::lookup_host(self.address.as_str()).await? {
            match connect_addr(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses resolved for {}", self.address),
            )
        }))
    }
}

async fn connect_addr(addr: SocketAddr) -> io::Result<TcpStream> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_keepalive(true)?;

    let stream = socket.connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
