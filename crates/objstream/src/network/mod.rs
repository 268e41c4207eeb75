//! Transport layer: dialing, retry and the live connection handle.
//!
//! This module provides:
//! - Bounded retry with optional backoff and jitter
//! - A connector that dials with timeouts and TCP keepalive
//! - The connection handle shared by readers, writers and the heartbeat

mod connection;
mod connector;
mod retry;

pub use connection::Connection;
pub use connector::Connector;
pub use retry::{retry_async, RetryConfig, RetryStats};
