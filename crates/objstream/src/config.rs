//! Stream configuration.
//!
//! [`StreamDefaults`] holds the constants the stream falls back to, and
//! [`StreamConfig`] is the caller-facing configuration surface. A config can
//! be built in code with the `with_*` methods or deserialized from JSON, where
//! durations are given in milliseconds.

use crate::network::RetryConfig;
use crate::protocol::rpc::RpcRequest;
use crate::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default values for stream configuration.
pub struct StreamDefaults;

impl StreamDefaults {
    pub const HOST: &'static str = "127.0.0.1";
    pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
    /// Total dial attempts, the first plus three retries.
    pub const DIAL_ATTEMPTS: u32 = 4;
    pub const RETRY_DELAY: Duration = Duration::ZERO;
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
    pub const HEARTBEAT_METHOD: &'static str = "wallet_status";
    pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024; // 32MB
    pub const SENTINEL: u8 = 0x00;
    pub const READ_CHUNK_SIZE: usize = 64 * 1024;
}

/// How frames are delimited on the wire.
///
/// Both ends of a connection must agree. `Sentinel` is the wire contract;
/// `Line` only exists for peers that still speak newline-terminated JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Frame ends at a single reserved control byte.
    Sentinel(u8),
    /// Frame ends at `\n`; a trailing `\r` is stripped on read.
    Line,
}

impl Framing {
    /// The byte that terminates a frame.
    pub fn delimiter(&self) -> u8 {
        match self {
            Framing::Sentinel(byte) => *byte,
            Framing::Line => b'\n',
        }
    }
}

impl Default for Framing {
    fn default() -> Self {
        Framing::Sentinel(StreamDefaults::SENTINEL)
    }
}

/// Read/write deadline policy for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlinePolicy {
    /// No deadline; liveness comes from heartbeats and TCP keepalive.
    #[default]
    None,
    /// One absolute deadline fixed at dial time. Once it passes, every
    /// operation on that connection times out and a reconnect follows.
    Absolute(#[serde(with = "duration_ms")] Duration),
    /// Deadline renewed at the start of every read or write.
    PerOperation(#[serde(with = "duration_ms")] Duration),
}

/// Configuration for an [`ObjectStream`](crate::ObjectStream).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Target host name or IP address.
    pub host: String,
    /// Target TCP port.
    pub port: u16,
    /// Timeout for a single dial attempt.
    #[serde(with = "duration_ms")]
    pub dial_timeout: Duration,
    /// Total dial attempts before a dial is reported as failed.
    pub dial_attempts: u32,
    /// Base delay between dial attempts (zero means retry immediately).
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    /// Randomize the delay between dial attempts.
    pub retry_jitter: bool,
    pub deadline: DeadlinePolicy,
    /// Heartbeat period; `None` disables the heartbeat.
    #[serde(with = "opt_duration_ms")]
    pub heartbeat_interval: Option<Duration>,
    /// Liveness payload written on every heartbeat.
    pub heartbeat_payload: serde_json::Value,
    /// Largest frame accepted on read, excluding the delimiter.
    pub max_frame_size: usize,
    pub framing: Framing,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: StreamDefaults::HOST.to_string(),
            port: 0,
            dial_timeout: StreamDefaults::DIAL_TIMEOUT,
            dial_attempts: StreamDefaults::DIAL_ATTEMPTS,
            retry_delay: StreamDefaults::RETRY_DELAY,
            retry_jitter: false,
            deadline: DeadlinePolicy::None,
            heartbeat_interval: Some(StreamDefaults::HEARTBEAT_INTERVAL),
            heartbeat_payload: RpcRequest::heartbeat().to_value(),
            max_frame_size: StreamDefaults::MAX_FRAME_SIZE,
            framing: Framing::default(),
        }
    }
}

impl StreamConfig {
    /// Create a config for the given target with default values.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Set the per-attempt dial timeout.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Set the total number of dial attempts.
    pub fn with_dial_attempts(mut self, attempts: u32) -> Self {
        self.dial_attempts = attempts;
        self
    }

    /// Set the base delay between dial attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the deadline policy.
    pub fn with_deadline(mut self, deadline: DeadlinePolicy) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the heartbeat period, or disable heartbeats with `None`.
    pub fn with_heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Replace the liveness payload.
    pub fn with_heartbeat_payload(mut self, payload: serde_json::Value) -> Self {
        self.heartbeat_payload = payload;
        self
    }

    /// Set the maximum frame size.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Set the framing convention.
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// The `host:port` string dialed by the connector.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Retry behavior for dialing, derived from this config.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(self.dial_attempts)
            .with_base_delay(self.retry_delay)
            .with_max_delay(StreamDefaults::RETRY_MAX_DELAY)
            .with_jitter(self.retry_jitter)
    }

    /// Check the config for values the stream cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(StreamError::config("host", "host must not be empty"));
        }
        if self.port == 0 {
            return Err(StreamError::config("port", "port must be non-zero"));
        }
        if self.dial_attempts == 0 {
            return Err(StreamError::config(
                "dial_attempts",
                "at least one dial attempt is required",
            ));
        }
        if self.max_frame_size == 0 {
            return Err(StreamError::config(
                "max_frame_size",
                "maximum frame size must be non-zero",
            ));
        }
        if let Framing::Sentinel(byte) = self.framing {
            // Compact JSON escapes every control byte, so only those are safe.
            if byte >= 0x20 {
                return Err(StreamError::config(
                    "framing",
                    format!("sentinel 0x{:02x} is not an ASCII control byte", byte),
                ));
            }
        }
        if self.heartbeat_interval == Some(Duration::ZERO) {
            return Err(StreamError::config(
                "heartbeat_interval",
                "heartbeat interval must be non-zero",
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
