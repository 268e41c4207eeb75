//! Error types for the object stream.
//!
//! Every caller-facing operation returns [`StreamError`]. Transport failures
//! are further classified by [`StreamError::is_connection_level`], which
//! decides whether a failure is handed to the reconnect supervisor.

use std::io::ErrorKind;
use thiserror::Error;

/// Main error type for stream operations.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Failed to dial {addr} after {attempts} attempts")]
    Dial {
        addr: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode object: {0}")]
    Encode(serde_json::Error),

    #[error("Failed to decode frame: {0}")]
    Decode(serde_json::Error),

    /// Transport failure; displays as the underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Stream is closed")]
    Closed,

    #[error("Stream was already closed")]
    AlreadyClosed,

    #[error("Configuration error for {field}: {message}")]
    Config { field: String, message: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
}

/// Result type alias for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;

impl StreamError {
    /// Build a configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        StreamError::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this failure means the current connection is unusable.
    ///
    /// Connection-level failures are reported to the reconnect supervisor.
    /// Everything else (payload errors, transient interruptions) is only
    /// surfaced to the caller.
    pub fn is_connection_level(&self) -> bool {
        match self {
            StreamError::Io(err) => is_connection_level_kind(err.kind()),
            _ => false,
        }
    }

    /// The underlying I/O error kind, if this is a transport failure.
    pub fn io_kind(&self) -> Option<ErrorKind> {
        match self {
            StreamError::Io(source) | StreamError::Dial { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

/// Classify an I/O error kind as connection-level or transient.
pub(crate) fn is_connection_level_kind(kind: ErrorKind) -> bool {
    !matches!(kind, ErrorKind::Interrupted | ErrorKind::WouldBlock)
}
