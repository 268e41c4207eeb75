//! JSON-RPC 2.0 envelope types.
//!
//! The stream itself carries any JSON value; these types only cover the
//! envelope shape used by the heartbeat and by [`ObjectStream::call`].
//!
//! [`ObjectStream::call`]: crate::ObjectStream::call

use crate::config::StreamDefaults;
use crate::{Result, StreamError};
use serde::{Deserialize, Serialize};

/// Id reserved for heartbeat requests.
pub const HEARTBEAT_ID: u64 = 1;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

impl RpcRequest {
    /// Create a new request with a numeric id.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id: Some(serde_json::Value::Number(id.into())),
        }
    }

    /// The canned liveness request written by the heartbeat.
    pub fn heartbeat() -> Self {
        Self::new(StreamDefaults::HEARTBEAT_METHOD, None, HEARTBEAT_ID)
    }

    pub fn to_value(&self) -> serde_json::Value {
        // Strings and JSON values always serialize.
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    /// Whether this response answers the request with the given id.
    pub fn answers(&self, id: u64) -> bool {
        self.id.as_ref().and_then(|v| v.as_u64()) == Some(id)
    }

    /// Convert into the result value, mapping an error object to
    /// [`StreamError::Rpc`]. A response with neither yields `null`.
    pub fn into_result(self) -> Result<serde_json::Value> {
        match self.error {
            Some(err) => Err(StreamError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}
