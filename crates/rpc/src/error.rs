use std::time::Duration;

use corelink_protocol::RpcFault;

/// Errors surfaced to callers of remote capabilities.
#[derive(thiserror::Error, Debug)]
pub enum RpcError {
    /// The byte port closed before the call completed.
    #[error("rpc connection closed")]
    Disconnected,

    /// The peer answered with a fault.
    #[error("remote fault: {0}")]
    Fault(#[from] RpcFault),

    /// A reply could not be decoded into the expected shape.
    #[error("protocol: {0}")]
    Protocol(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl RpcError {
    /// Whether the error means the connection itself is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, RpcError::Disconnected)
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Protocol(e.to_string())
    }
}
