//! objstream - Self-healing JSON object stream over a single TCP connection.
//!
//! This crate lets a client exchange JSON objects with a long-running service
//! (typically a wallet daemon speaking JSON-RPC) over one TCP connection. Each
//! object travels as compact JSON followed by a one-byte delimiter. The stream
//! keeps itself alive: a background heartbeat writes a liveness request on a
//! fixed period, and any connection-level failure triggers exactly one
//! reconnect in the background.
//!
//! # Example
//!
//! ```rust,ignore
//! use objstream::{ObjectStream, StreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> objstream::Result<()> {
//!     let stream = ObjectStream::connect(StreamConfig::new("127.0.0.1", 18082)).await?;
//!
//!     let response = stream.call("get_balance", None).await?;
//!     println!("balance: {:?}", response.into_result()?);
//!
//!     stream.close().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod shutdown;
pub mod stream;

#[cfg(test)]
mod testing;

pub use config::{DeadlinePolicy, Framing, StreamConfig, StreamDefaults};
pub use error::{Result, StreamError};
pub use protocol::{RpcErrorObject, RpcRequest, RpcResponse};
pub use shutdown::ShutdownSignal;
pub use stream::{ObjectStream, StreamStats};
