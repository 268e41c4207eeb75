//! Wire protocol: frame encoding, the pending read buffer, buffer pooling
//! and the JSON-RPC envelope.

pub mod frame;
pub mod pool;
pub mod rpc;

pub use frame::{decode_frame, encode_frame, FrameBuffer};
pub use pool::{BufferPool, PoolStats};
pub use rpc::{RpcErrorObject, RpcRequest, RpcResponse, HEARTBEAT_ID};
